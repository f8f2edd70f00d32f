use std::{
    fs::{File, Permissions},
    io::Write,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Error};

/// Creates a file and all parent directories if they don't exist
pub fn create_file<S>(path: S) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    if let Some(parent) = path.as_ref().parent() {
        create_dirs(parent)?;
    }

    std::fs::File::create(path.as_ref()).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))
}

/// Creates a file and all parent directories if they don't exist, and sets the file mode
pub fn create_file_mode<S>(path: S, mode: u32) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    let file = create_file(path.as_ref())?;
    std::fs::set_permissions(path.as_ref(), Permissions::from_mode(mode)).context(format!(
        "Could not set permissions {:#o} for file {}",
        mode,
        path.as_ref().display()
    ))?;
    Ok(file)
}

/// Creates all directories in a path if they don't exist
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

/// Reads the content of a file and trims it
pub fn read_file_trim<S>(file_path: &S) -> Result<String, Error>
where
    S: AsRef<Path>,
{
    let content = std::fs::read_to_string(file_path.as_ref()).context(format!(
        "Could not read file contents: {:?}",
        file_path.as_ref()
    ))?;
    Ok(content.trim().to_string())
}

/// Reads the content of a file, returning `None` if it does not exist
pub fn read_file_if_exists<S>(file_path: S) -> Result<Option<String>, Error>
where
    S: AsRef<Path>,
{
    match std::fs::read_to_string(file_path.as_ref()) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(format!(
            "Could not read file contents: {}",
            file_path.as_ref().display()
        )),
    }
}

/// Writes to a file
pub fn write_file<S>(path: S, mode: u32, contents: &[u8]) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    let mut file = create_file_mode(path.as_ref(), mode).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))?;

    file.write_all(contents).context(format!(
        "Could not write to file: {}",
        path.as_ref().display()
    ))?;

    Ok(())
}

/// Replaces a file through a temporary file in the same directory. The
/// existing file mode is kept, `default_mode` is used for new files.
pub fn replace_file<S>(path: S, default_mode: u32, contents: &[u8]) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    let path = path.as_ref();
    let mode = match std::fs::metadata(path) {
        Ok(metadata) => metadata.permissions().mode(),
        Err(_) => default_mode,
    };

    let parent = path
        .parent()
        .with_context(|| format!("Path has no parent: {}", path.display()))?;
    create_dirs(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)
        .context(format!("Failed to create temporary file in {}", parent.display()))?;
    file.write_all(contents)
        .context("Failed to write temporary file")?;
    std::fs::set_permissions(file.path(), Permissions::from_mode(mode)).context(format!(
        "Could not set permissions {:#o} for temporary file",
        mode
    ))?;
    file.persist(path)
        .context(format!("Failed to replace file: {}", path.display()))?;

    Ok(())
}

/// Removes a file, succeeding if it does not exist. Returns whether a file
/// was removed.
pub fn remove_file_if_exists<S>(path: S) -> Result<bool, Error>
where
    S: AsRef<Path>,
{
    match std::fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).context(format!(
            "Could not remove file: {}",
            path.as_ref().display()
        )),
    }
}
