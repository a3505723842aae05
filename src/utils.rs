//! Utility functions for filename derivation, progress math, and medium capacity

use crate::types::FileName;
use std::path::Path;

/// Derive the on-device filename from a presigned object URL.
///
/// The object key is everything after the `/` that ends the host, up to the
/// query string. The filename is the key's last path segment, taken verbatim
/// and bounded to the filename capacity. Falls back to `fallback` when the URL
/// has no host terminator, the key is empty, or the last segment is empty,
/// `.` or `..`.
///
/// # Examples
///
/// ```
/// use sample_dl::utils::derive_filename;
///
/// let name = derive_filename(
///     "https://bucket.s3.amazonaws.com/kits/808/drum.wav?X-Amz-Signature=abc",
///     "unknown.dat",
/// );
/// assert_eq!(name.as_str(), "drum.wav");
/// ```
pub fn derive_filename(url: &str, fallback: &str) -> FileName {
    let key = url
        .split_once("://")
        .map(|(_, rest)| rest.split_once('?').map_or(rest, |(before, _query)| before))
        .and_then(|rest| rest.split_once('/'))
        .map(|(_host, key)| key);

    let name = key.and_then(|key| key.rsplit('/').next());
    match name {
        Some(name) if !name.is_empty() && name != "." && name != ".." => FileName::new(name),
        _ => FileName::new(fallback),
    }
}

/// Whole-percent progress, or `None` when the total is unknown or zero
pub fn progress_percent(bytes_so_far: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => {
            let percent = bytes_so_far.saturating_mul(100) / total;
            Some(percent.min(100) as u8)
        }
        _ => None,
    }
}

/// Space figures for a mounted filesystem, in bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpaceInfo {
    /// Bytes available to unprivileged writers
    pub available: u64,
    /// Total size of the filesystem
    pub total: u64,
}

/// Get available and total space for the filesystem holding `path`
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux/macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Errors
///
/// Returns the OS error when the path does not exist or cannot be queried.
pub fn get_space_info(path: &Path) -> std::io::Result<SpaceInfo> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zeroed before
        // the call and only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // Field widths differ between platforms
            #[allow(clippy::unnecessary_cast)]
            let (frsize, bavail, blocks) = (
                stat.f_frsize as u64,
                stat.f_bavail as u64,
                stat.f_blocks as u64,
            );
            Ok(SpaceInfo {
                available: bavail.saturating_mul(frsize),
                total: blocks.saturating_mul(frsize),
            })
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out pointer refers to
        // a live, aligned u64 read only after the call succeeds.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(SpaceInfo {
                available: free_bytes_available,
                total: total_bytes,
            })
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
