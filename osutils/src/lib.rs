pub mod augtree;
pub mod dependencies;
pub mod files;
pub mod grub_mkconfig;
pub mod grubby;
pub mod osrelease;
pub mod password;
pub mod path;
