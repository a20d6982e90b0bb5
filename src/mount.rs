//! `mkdir` wrapper that maps a logical path to its mount point first.

use alloc::string::String;

/// Return value of the wrapper when the path is not under any mount.
pub const UNRESOLVED: i32 = -1;

/// Maps logical paths (as seen by applications) to physical ones.
pub trait MountResolver {
    fn resolve(&self, path: &str) -> Option<String>;
}

impl<F> MountResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, path: &str) -> Option<String> {
        self(path)
    }
}

/// Resolve `path` and hand the physical path to `real_mkdir`, returning
/// its result.
pub fn mkdir_resolved<M, F>(resolver: &M, path: &str, mode: u32, real_mkdir: F) -> i32
where
    M: MountResolver + ?Sized,
    F: FnOnce(&str, u32) -> i32,
{
    match resolver.resolve(path) {
        Some(physical) => real_mkdir(&physical, mode),
        None => {
            log::debug!("mkdir: no mount for {}", path);
            UNRESOLVED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::ToString;

    fn sd_only(path: &str) -> Option<String> {
        path.strip_prefix("/sd").map(|rest| format!("/sdcard{}", rest))
    }

    #[test]
    fn test_resolved_path_is_passed_on() {
        let mut seen = None;
        let r = mkdir_resolved(&sd_only, "/sd/logs", 0o755, |p, mode| {
            seen = Some((p.to_string(), mode));
            0
        });
        assert_eq!(r, 0);
        assert_eq!(seen, Some(("/sdcard/logs".to_string(), 0o755)));
    }

    #[test]
    fn test_result_comes_from_real_mkdir() {
        assert_eq!(mkdir_resolved(&sd_only, "/sd/x", 0, |_, _| 17), 17);
    }

    #[test]
    fn test_unresolved_path_skips_real_mkdir() {
        let mut called = false;
        let r = mkdir_resolved(&sd_only, "/flash/x", 0, |_, _| {
            called = true;
            0
        });
        assert_eq!(r, UNRESOLVED);
        assert!(!called);
    }
}
