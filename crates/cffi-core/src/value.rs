//! Host-side values: what the embedding scripting runtime hands to the FFI
//! and gets back from it.

use crate::cdata::CData;
use crate::errors::Result;
use crate::library::Library;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Signature of a function provided by the host. Every host function can
/// return several values; most return exactly one.
pub type HostFn = dyn Fn(&[Value]) -> Result<Vec<Value>>;

/// A callable host function with a name used in error messages
#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    func: Rc<HostFn>,
}

impl HostFunction {
    pub fn new(name: &str, func: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static) -> Self {
        HostFunction {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        (self.func)(args)
    }

    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    /// A host string holding bytes that are not valid UTF-8
    Bytes(Vec<u8>),
    Array(Rc<RefCell<Vec<Value>>>),
    Table(Rc<RefCell<HashMap<String, Value>>>),
    Function(HostFunction),
    CData(CData),
    Library(Library),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn table<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Table(Rc::new(RefCell::new(map)))
    }

    /// A host string from raw bytes, kept as text when it is valid UTF-8
    pub fn bytes(bytes: Vec<u8>) -> Value {
        match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }

    pub fn function(
        name: &str,
        func: impl Fn(&[Value]) -> Result<Vec<Value>> + 'static,
    ) -> Value {
        Value::Function(HostFunction::new(name, func))
    }

    /// Name of the host type, as used in conversion error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) | Value::Bytes(_) => "string",
            Value::Array(_) | Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::CData(_) => "cdata",
            Value::Library(_) => "userdata",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    pub fn as_cdata(&self) -> Option<&CData> {
        match self {
            Value::CData(cd) => Some(cd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Contents of either kind of host string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Host numbers as a 64-bit integer; floats must be integral
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Number(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(_) | Value::Bytes(_), Value::String(_) | Value::Bytes(_)) => {
                self.as_bytes() == other.as_bytes()
            }
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::CData(a), Value::CData(b)) => a.ptr_eq(b),
            (Value::Library(a), Value::Library(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, val) in arr.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{val}")?;
                }
                write!(f, "]")
            }
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(func) => write!(f, "function: {}", func.name()),
            Value::CData(cd) => write!(f, "{cd}"),
            Value::Library(lib) => write!(f, "{lib}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::bytes(bytes)
    }
}

impl From<CData> for Value {
    fn from(cd: CData) -> Self {
        Value::CData(cd)
    }
}

impl From<Library> for Value {
    fn from(lib: Library) -> Self {
        Value::Library(lib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "nil");
        assert_eq!(Value::Integer(1).type_name(), "number");
        assert_eq!(Value::Number(1.5).type_name(), "number");
        assert_eq!(Value::array(vec![]).type_name(), "table");
    }

    #[test]
    fn test_mixed_number_equality() {
        assert_eq!(Value::Integer(3), Value::Number(3.0));
        assert_ne!(Value::Integer(3), Value::Number(3.5));
    }

    #[test]
    fn test_host_function_call() {
        let f = HostFunction::new("double", |args| {
            let n = args.first().and_then(Value::as_integer).unwrap_or(0);
            Ok(vec![Value::Integer(n * 2)])
        });
        assert_eq!(f.call(&[Value::Integer(21)]).unwrap(), vec![Value::Integer(42)]);
        assert!(f.ptr_eq(&f.clone()));
    }

    #[test]
    fn test_as_integer_rejects_fractions() {
        assert_eq!(Value::Number(4.0).as_integer(), Some(4));
        assert_eq!(Value::Number(4.5).as_integer(), None);
        assert_eq!(Value::from("4").as_integer(), None);
    }

    #[test]
    fn test_byte_strings() {
        assert_eq!(Value::bytes(b"abc".to_vec()), Value::String("abc".into()));
        let raw = Value::bytes(vec![0xff, 0x80, 0x41]);
        assert!(matches!(raw, Value::Bytes(_)));
        assert_eq!(raw.type_name(), "string");
        assert_eq!(raw.as_bytes(), Some(&[0xff, 0x80, 0x41][..]));
        assert_eq!(raw.as_str(), None);
        assert_ne!(raw, Value::from("\u{fffd}\u{fffd}A"));
    }
}
