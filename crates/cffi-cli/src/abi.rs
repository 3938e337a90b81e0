//! `abi` subcommand handler

use cffi_core::{Ffi, abi};
use serde::Serialize;
use std::collections::BTreeMap;

/// Types whose size and alignment the report lists
const REPORTED_TYPES: [&str; 11] = [
    "char",
    "short",
    "int",
    "long",
    "long long",
    "float",
    "double",
    "void *",
    "size_t",
    "ptrdiff_t",
    "wchar_t",
];

#[derive(Debug, Serialize)]
pub struct TypeInfo {
    pub size: usize,
    pub align: usize,
}

#[derive(Debug, Serialize)]
pub struct AbiReport {
    pub os: &'static str,
    pub arch: &'static str,
    pub flags: Vec<&'static str>,
    pub types: BTreeMap<&'static str, TypeInfo>,
}

impl AbiReport {
    pub fn collect() -> Result<AbiReport, String> {
        let ffi = Ffi::new();
        let mut types = BTreeMap::new();
        for name in REPORTED_TYPES {
            let ty = name.into();
            let size = ffi
                .sizeof(&ty, None)
                .map_err(|err| err.to_string())?
                .unwrap_or(0);
            let align = ffi.alignof(&ty).map_err(|err| err.to_string())?;
            types.insert(name, TypeInfo { size, align });
        }
        Ok(AbiReport {
            os: abi::os(),
            arch: abi::arch(),
            flags: abi::abi_flags(),
            types,
        })
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "os:    {}\narch:  {}\nflags: {}\n",
            self.os,
            self.arch,
            self.flags.join(" ")
        );
        for (name, info) in &self.types {
            out.push_str(&format!("{name:<10} size {:>2}  align {:>2}\n", info.size, info.align));
        }
        out.truncate(out.trim_end().len());
        out
    }
}

pub fn handle_abi(json: bool) -> Result<String, String> {
    let report = AbiReport::collect()?;
    if json {
        serde_json::to_string_pretty(&report).map_err(|err| err.to_string())
    } else {
        Ok(report.render())
    }
}
