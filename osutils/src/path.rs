use std::path::{Path, PathBuf};

fn strip_root(path: &Path) -> &Path {
    match path.strip_prefix("/") {
        Ok(relative) => relative,
        Err(_) => path,
    }
}

/// Returns the path obtained by joining the given base path with the given relative path.
pub fn join_relative(base: impl AsRef<Path>, relative: impl AsRef<Path>) -> PathBuf {
    base.as_ref().join(strip_root(relative.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_relative() {
        assert_eq!(
            join_relative("/", "/etc/default/grub"),
            Path::new("/etc/default/grub")
        );
        assert_eq!(
            join_relative("/mnt/root", "/etc/default/grub"),
            Path::new("/mnt/root/etc/default/grub")
        );
        assert_eq!(
            join_relative("/mnt/root", "boot/grub2"),
            Path::new("/mnt/root/boot/grub2")
        );
    }
}
