use const_format::formatcp;

// Option directives

/// Keep whatever the system already has.
pub const PRESERVE: &str = ":preserve:";

/// Seed from the options of the default boot entry.
pub const DEFAULTS: &str = ":defaults:";

/// Resolve a single value from the default boot entry.
pub const DEFAULT: &str = ":default:";

/// Prefix of a directive that removes matching options.
pub const DISCARD_PREFIX: &str = "-:";

/// Prefix of a directive that appends an option even if its name exists.
pub const APPEND_PREFIX: &str = "!:";

/// Authorized-users sentinel meaning any user may boot the entry.
pub const UNRESTRICTED: &str = "unrestricted";

// Shell variables

/// Kernel command line used for every boot.
pub const GRUB_CMDLINE_LINUX: &str = "GRUB_CMDLINE_LINUX";

/// Kernel command line used for non-recovery boots.
pub const GRUB_CMDLINE_LINUX_DEFAULT: &str = "GRUB_CMDLINE_LINUX_DEFAULT";

/// Variable enabling Boot Loader Specification entries.
pub const GRUB_ENABLE_BLSCFG: &str = "GRUB_ENABLE_BLSCFG";

/// grubenv variable holding the BLS kernel command line.
pub const KERNELOPTS: &str = "kernelopts";

// File locations, all relative to the managed root

/// Shell-variable defaults consumed by grub2-mkconfig.
pub const ETC_DEFAULT_GRUB: &str = "/etc/default/grub";

/// GRUB legacy menu.
pub const GRUB_LEGACY_MENU_LST: &str = "/boot/grub/menu.lst";

/// GRUB legacy menu on EFI RedHat systems.
pub const GRUB_LEGACY_EFI_CONF: &str = "/boot/efi/EFI/redhat/grub.conf";

/// GRUB2 boot directory.
pub const GRUB2_DIRECTORY: &str = "/boot/grub2";

/// GRUB2 environment block.
pub const GRUBENV_PATH: &str = formatcp!("{GRUB2_DIRECTORY}/grubenv");

/// Directory holding BLS snippets.
pub const BLS_ENTRIES_DIRECTORY: &str = "/boot/loader/entries";

/// Directory of grub-mkconfig script fragments.
pub const GRUB_D_DIRECTORY: &str = "/etc/grub.d";

/// Managed GRUB2 users script.
pub const GRUB_USERS_FILE: &str = formatcp!("{GRUB_D_DIRECTORY}/02_puppet_managed_users");

/// Users script written by older releases, removed on flush.
pub const GRUB_USERS_LEGACY_FILE: &str = formatcp!("{GRUB_D_DIRECTORY}/01_puppet_managed_users");

/// Prefix of managed legacy menu entry scripts.
pub const MANAGED_ENTRY_PREFIX: &str = formatcp!("{GRUB_D_DIRECTORY}/05_puppet_managed_");

/// Present when the system booted through UEFI.
pub const EFI_FIRMWARE_DIRECTORY: &str = "/sys/firmware/efi";

/// Absolute path to the /etc/os-release file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Root volume mount point path.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

// Generated content

/// Marker placed in every file this tool generates.
pub const MANAGED_MARKER: &str = "### PUPPET MANAGED ###";

/// Modules loaded by generated GRUB2 entries unless told otherwise.
pub const DEFAULT_PLUGINS: [&str; 4] = ["gzio", "part_msdos", "xfs", "ext2"];

/// Classes given to generated BLS entries unless told otherwise.
pub const DEFAULT_BLS_CLASSES: [&str; 1] = ["kernel"];

/// PBKDF2 iterations used for new GRUB2 password hashes.
pub const DEFAULT_PBKDF2_ROUNDS: u32 = 10000;

/// Mode of generated grub.d scripts.
pub const SCRIPT_FILE_MODE: u32 = 0o755;

/// Mode of generated BLS snippets.
pub const BLS_FILE_MODE: u32 = 0o644;
