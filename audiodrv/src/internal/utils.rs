//! Internal utility functions

use std::ffi::{c_char, CStr};

/// Convert a C-style string to Rust String. Null becomes an empty string.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
