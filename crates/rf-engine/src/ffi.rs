//! C ABI for IR uploads and slot names
//!
//! Both entry points act on the process-wide registry,
//! see [`IrSlotStore::global`].

#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::{CStr, c_char, c_int};

use crate::slots::IrSlotStore;

/// Longest accepted IR name, including the terminator
const MAX_FFI_NAME_LEN: usize = 1024;

/// Convert a C string to String with a length limit.
///
/// # Safety
/// - `ptr` must be null or point to a readable, null-terminated string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }

    let mut len = 0;
    unsafe {
        while len < MAX_FFI_NAME_LEN && *ptr.add(len) != 0 {
            len += 1;
        }
    }
    if len >= MAX_FFI_NAME_LEN {
        log::warn!("IR name exceeds maximum length of {MAX_FFI_NAME_LEN}");
        return None;
    }

    unsafe { CStr::from_ptr(ptr).to_str().ok().map(str::to_owned) }
}

/// Upload `frames * channels` interleaved samples into slot `index`.
///
/// Returns `false` for a negative or out-of-range index, negative sizes, or
/// a null `data` with a non-empty size. A null or invalid `name` stores an
/// empty name.
#[unsafe(no_mangle)]
pub extern "C" fn rf_convolution_upload_sample(
    index: c_int,
    data: *const f32,
    frames: c_int,
    channels: c_int,
    sample_rate: c_int,
    name: *const c_char,
) -> bool {
    let (Ok(slot), Ok(frames), Ok(channels), Ok(sample_rate)) = (
        usize::try_from(index),
        usize::try_from(frames),
        usize::try_from(channels),
        u32::try_from(sample_rate),
    ) else {
        return false;
    };

    let store = IrSlotStore::global();
    if slot >= store.slot_count() {
        return false;
    }
    let Some(len) = frames.checked_mul(channels) else {
        return false;
    };

    let samples: &[f32] = if len == 0 {
        &[]
    } else if data.is_null() {
        return false;
    } else {
        // Safety: caller guarantees `data` holds frames * channels floats
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    let name = unsafe { cstr_to_string(name) }.unwrap_or_default();

    store.upload(slot, samples, frames, channels, sample_rate, &name)
}

/// Copy the name of slot `index` into `buffer` as a null-terminated string,
/// truncating to `capacity - 1` bytes.
///
/// Returns the full name length in bytes, or -1 if `buffer` is null or
/// `capacity` is not positive.
#[unsafe(no_mangle)]
pub extern "C" fn rf_convolution_sample_name(
    index: c_int,
    buffer: *mut c_char,
    capacity: c_int,
) -> c_int {
    let capacity = match usize::try_from(capacity) {
        Ok(capacity) if capacity > 0 && !buffer.is_null() => capacity,
        _ => return -1,
    };

    // negative indices fall through to the unset name
    let slot = usize::try_from(index).unwrap_or(usize::MAX);
    let name = IrSlotStore::global().name(slot);
    let bytes = name.as_bytes();
    let copied = bytes.len().min(capacity - 1);

    // Safety: caller guarantees `buffer` holds `capacity` bytes
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), buffer, copied);
        *buffer.add(copied) = 0;
    }
    c_int::try_from(bytes.len()).unwrap_or(c_int::MAX)
}
