use cffi_core::{BinOp, Ffi, Value};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_int_add(c: &mut Criterion) {
    let ffi = Ffi::new();
    let a = Value::CData(ffi.new_cdata(&"int".into(), &[Value::Integer(40)]).unwrap());
    let b = Value::Integer(2);
    c.bench_function("cdata int + host integer", |bench| {
        bench.iter(|| ffi.arith(BinOp::Add, black_box(&a), black_box(&b)))
    });
}

fn bench_u64_mul(c: &mut Criterion) {
    let ffi = Ffi::new();
    let a = Value::CData(
        ffi.new_cdata(&"unsigned long long".into(), &[Value::Integer(1 << 33)])
            .unwrap(),
    );
    let b = Value::CData(ffi.new_cdata(&"short".into(), &[Value::Integer(-3)]).unwrap());
    c.bench_function("u64 * short", |bench| {
        bench.iter(|| ffi.arith(BinOp::Mul, black_box(&a), black_box(&b)))
    });
}

fn bench_pointer_add(c: &mut Criterion) {
    let ffi = Ffi::new();
    let arr = Value::CData(ffi.new_cdata(&"double[16]".into(), &[]).unwrap());
    let off = Value::Integer(7);
    c.bench_function("array decay + offset", |bench| {
        bench.iter(|| ffi.arith(BinOp::Add, black_box(&arr), black_box(&off)))
    });
}

fn bench_field_access(c: &mut Criterion) {
    let ffi = Ffi::new();
    ffi.cdef("struct point { int x, y; };").unwrap();
    let p = Value::CData(
        ffi.new_cdata(&"struct point".into(), &[Value::Integer(1), Value::Integer(2)])
            .unwrap(),
    );
    let key = Value::from("y");
    c.bench_function("struct field read", |bench| {
        bench.iter(|| ffi.index(black_box(&p), black_box(&key)))
    });
}

fn bench_compare(c: &mut Criterion) {
    let ffi = Ffi::new();
    let a = Value::CData(ffi.new_cdata(&"long long".into(), &[Value::Integer(-1)]).unwrap());
    let b = Value::CData(
        ffi.new_cdata(&"unsigned int".into(), &[Value::Integer(1)])
            .unwrap(),
    );
    c.bench_function("mixed signedness compare", |bench| {
        bench.iter(|| ffi.lt(black_box(&a), black_box(&b)))
    });
}

criterion_group!(
    benches,
    bench_int_add,
    bench_u64_mul,
    bench_pointer_add,
    bench_field_access,
    bench_compare
);
criterion_main!(benches);
