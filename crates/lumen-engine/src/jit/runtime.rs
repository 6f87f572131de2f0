//! Host-runtime surface imported by JIT-compiled code
//!
//! The C-ABI helpers generated code calls by name: the memory manager, the
//! string builder, and the typed print shims. Every allocation handed to
//! generated code comes from `malloc` so `mem_deallocate` can free anything
//! the helpers produce, including finished string-builder buffers.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

/// Allocate `size` bytes, aligned to at least 16. Never returns on failure.
pub extern "C" fn mem_allocate(size: usize) -> *mut c_void {
    // malloc guarantees 16-byte alignment on 64-bit platforms.
    let ptr = unsafe { libc::malloc(size.max(1)) };
    if ptr.is_null() {
        std::process::abort();
    }
    ptr
}

/// Free a pointer from `mem_allocate` or a helper. Tolerates null.
pub extern "C" fn mem_deallocate(ptr: *mut c_void) {
    if !ptr.is_null() {
        unsafe { libc::free(ptr) };
    }
}

/// Opaque string-builder handle
pub struct JitStringBuilder {
    buffer: String,
}

/// Create a string builder
pub extern "C" fn jit_sb_create() -> *mut JitStringBuilder {
    Box::into_raw(Box::new(JitStringBuilder { buffer: String::new() }))
}

/// Destroy a string builder without finishing it
pub extern "C" fn jit_sb_destroy(sb: *mut JitStringBuilder) {
    if !sb.is_null() {
        drop(unsafe { Box::from_raw(sb) });
    }
}

/// Finish a string builder, returning a malloc-allocated C string the
/// caller owns (freed through `mem_deallocate`). Destroys the builder.
pub extern "C" fn jit_sb_finish(sb: *mut JitStringBuilder) -> *const c_char {
    if sb.is_null() {
        return std::ptr::null();
    }
    let builder = unsafe { Box::from_raw(sb) };
    copy_to_c_string(&builder.buffer)
}

/// Append a C string
pub extern "C" fn jit_sb_append_cstr(sb: *mut JitStringBuilder, s: *const c_char) {
    if sb.is_null() || s.is_null() {
        return;
    }
    let text = unsafe { CStr::from_ptr(s) }.to_string_lossy();
    unsafe { &mut *sb }.buffer.push_str(&text);
}

/// Append a stringified integer
pub extern "C" fn jit_sb_append_int(sb: *mut JitStringBuilder, v: i64) {
    if !sb.is_null() {
        unsafe { &mut *sb }.buffer.push_str(&v.to_string());
    }
}

/// Append a stringified float
pub extern "C" fn jit_sb_append_float(sb: *mut JitStringBuilder, v: f64) {
    if !sb.is_null() {
        unsafe { &mut *sb }.buffer.push_str(&v.to_string());
    }
}

/// Append `true` or `false`
pub extern "C" fn jit_sb_append_bool(sb: *mut JitStringBuilder, v: bool) {
    if !sb.is_null() {
        unsafe { &mut *sb }
            .buffer
            .push_str(if v { "true" } else { "false" });
    }
}

/// Print a signed integer followed by a newline
pub extern "C" fn jit_print_int(v: i64) {
    println!("{}", v);
}

/// Print an unsigned integer followed by a newline
pub extern "C" fn jit_print_uint(v: u64) {
    println!("{}", v);
}

/// Print a float followed by a newline
pub extern "C" fn jit_print_float(v: f64) {
    println!("{}", v);
}

/// Stringify an integer into a malloc-allocated C string
pub extern "C" fn jit_int_to_string(v: i64) -> *const c_char {
    copy_to_c_string(&v.to_string())
}

/// Stringify a float into a malloc-allocated C string
pub extern "C" fn jit_float_to_string(v: f64) -> *const c_char {
    copy_to_c_string(&v.to_string())
}

/// Stringify a boolean into a malloc-allocated C string
pub extern "C" fn jit_bool_to_string(v: bool) -> *const c_char {
    copy_to_c_string(if v { "true" } else { "false" })
}

fn copy_to_c_string(s: &str) -> *const c_char {
    let bytes = s.as_bytes();
    let ptr = mem_allocate(bytes.len() + 1) as *mut u8;
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        *ptr.add(bytes.len()) = 0;
    }
    ptr as *const c_char
}

/// The symbols registered with the emitter by name.
///
/// `printf`, `puts`, `strlen`, `memcpy`, `malloc`, and `free` resolve from
/// the host process directly.
pub fn runtime_symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        ("mem_allocate", mem_allocate as *const u8),
        ("mem_deallocate", mem_deallocate as *const u8),
        ("jit_sb_create", jit_sb_create as *const u8),
        ("jit_sb_destroy", jit_sb_destroy as *const u8),
        ("jit_sb_finish", jit_sb_finish as *const u8),
        ("jit_sb_append_cstr", jit_sb_append_cstr as *const u8),
        ("jit_sb_append_int", jit_sb_append_int as *const u8),
        ("jit_sb_append_float", jit_sb_append_float as *const u8),
        ("jit_sb_append_bool", jit_sb_append_bool as *const u8),
        ("jit_print_int", jit_print_int as *const u8),
        ("jit_print_uint", jit_print_uint as *const u8),
        ("jit_print_float", jit_print_float as *const u8),
        ("jit_int_to_string", jit_int_to_string as *const u8),
        ("jit_float_to_string", jit_float_to_string as *const u8),
        ("jit_bool_to_string", jit_bool_to_string as *const u8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_mem_allocate_alignment() {
        let ptr = mem_allocate(64);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 16, 0);
        mem_deallocate(ptr);
        // Null is tolerated.
        mem_deallocate(std::ptr::null_mut());
    }

    #[test]
    fn test_string_builder_round_trip() {
        let sb = jit_sb_create();
        let hello = b"x = \0";
        jit_sb_append_cstr(sb, hello.as_ptr() as *const c_char);
        jit_sb_append_int(sb, 42);
        jit_sb_append_cstr(sb, b", ok = \0".as_ptr() as *const c_char);
        jit_sb_append_bool(sb, true);
        let out = jit_sb_finish(sb);
        let text = unsafe { CStr::from_ptr(out) }.to_str().unwrap();
        assert_eq!(text, "x = 42, ok = true");
        mem_deallocate(out as *mut c_void);
    }

    #[test]
    fn test_string_builder_float_append() {
        let sb = jit_sb_create();
        jit_sb_append_float(sb, 2.5);
        let out = jit_sb_finish(sb);
        let text = unsafe { CStr::from_ptr(out) }.to_str().unwrap();
        assert_eq!(text, "2.5");
        mem_deallocate(out as *mut c_void);
    }

    #[test]
    fn test_to_string_helpers() {
        let s = jit_int_to_string(-7);
        assert_eq!(unsafe { CStr::from_ptr(s) }.to_str().unwrap(), "-7");
        mem_deallocate(s as *mut c_void);

        let s = jit_bool_to_string(false);
        assert_eq!(unsafe { CStr::from_ptr(s) }.to_str().unwrap(), "false");
        mem_deallocate(s as *mut c_void);
    }

    #[test]
    fn test_destroy_without_finish() {
        let sb = jit_sb_create();
        jit_sb_append_int(sb, 1);
        jit_sb_destroy(sb);
        // Destroy and finish tolerate null handles.
        jit_sb_destroy(std::ptr::null_mut());
        assert!(jit_sb_finish(std::ptr::null_mut()).is_null());
    }
}
