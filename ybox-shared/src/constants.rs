//! Fixed file, path and label names used by ybox that are not
//! configurable.

/// Prefix for container-specific images (no shared root).
pub const IMAGE_PREFIX: &str = "ybox-local";

/// Prefix for per-distribution images shared by all containers with
/// `shared_root` enabled.
pub const SHARED_IMAGE_PREFIX: &str = "ybox-shared-local";

/// Entrypoint script for the base container that creates the sudo user.
pub const ENTRYPOINT_BASE: &str = "entrypoint-base.sh";

/// Entrypoint script for the throwaway container that copies directories
/// into the shared root.
pub const ENTRYPOINT_CP: &str = "entrypoint-cp.sh";

/// Entrypoint script for the final container.
pub const ENTRYPOINT: &str = "entrypoint.sh";

/// All common scripts copied into the container scripts directory.
pub const RESOURCE_SCRIPTS: &[&str] = &[
    ENTRYPOINT_BASE,
    ENTRYPOINT_CP,
    ENTRYPOINT,
    "entrypoint-common.sh",
    "entrypoint-root.sh",
    "replicate-configs.sh",
    "run-in-dir",
];

/// Distribution-specific scripts expected for every supported
/// distribution.
pub const DISTRIBUTION_SCRIPTS: &[&str] = &["init-base.sh", "init.sh", "init-user.sh"];

/// Marker file whose presence tells the entrypoint that first-run
/// initialization is already done.
pub const INIT_DONE_FILE: &str = "init-done";

/// Mount point of the shared root inside the copy container.
pub const SHARED_ROOT_MOUNT_DIR: &str = "/ybox-root";

/// Mount point of the status file inside a container. Must match the
/// path used by entrypoint-common.sh.
pub const STATUS_TARGET_FILE: &str = "/usr/local/ybox-status";

/// Mount point of the scripts directory inside a container.
pub const TARGET_SCRIPTS_DIR: &str = "/usr/local/ybox";

/// Directories inside the container that hold desktop files eligible for
/// host wrappers.
pub const CONTAINER_DESKTOP_DIRS: &[&str] = &["/usr/share/applications"];

/// Directories inside the container that hold executables eligible for
/// host wrappers.
pub const CONTAINER_BIN_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin"];

/// Field separator used in the opt_deps template output.
pub const FIELD_SEPARATOR: &str = "::::";

/// Line prefix used in the opt_deps template output.
pub const OPT_DEPS_PREFIX: &str = "PKG:";

/// Header line that precedes the machine-readable part of the opt_deps
/// template output.
pub const OPT_DEPS_HEADER: &str = "Found optional dependencies";

/// Label group attached to every engine object created by ybox.
pub const CONTAINER_LABEL_GROUP: &str = "io.ybox.container";

/// Label key for the container type.
pub const CONTAINER_TYPE_LABEL: &str = "io.ybox.container.type";

/// Label key for the container distribution.
pub const CONTAINER_DISTRIBUTION_LABEL: &str = "io.ybox.container.distribution";

/// Container type label values. The first two mark temporary containers
/// used during creation.
pub const CONTAINER_TYPE_BASE: &str = "base";
pub const CONTAINER_TYPE_COPY: &str = "copy";
pub const CONTAINER_TYPE_PRIMARY: &str = "primary";

/// Default mode for directories created by ybox.
pub const DEFAULT_DIR_MODE: u32 = 0o750;

/// Default seconds to wait for a container status transition.
pub const DEFAULT_STATUS_WAIT_SECS: u64 = 120;

/// Seconds to wait for the first boot which also runs distribution
/// initialization and package upgrades.
pub const FIRST_BOOT_WAIT_SECS: u64 = 600;

/// Default seconds to wait for the state database or shared-root lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;
