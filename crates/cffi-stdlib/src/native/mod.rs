mod ffi;
mod helpers;

pub use ffi::*;
pub use helpers::*;

#[cfg(test)]
mod ffi_tests;
#[cfg(test)]
mod helpers_tests;
