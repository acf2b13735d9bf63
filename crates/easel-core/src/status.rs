//! String-valued enums shared across the workspace.
//!
//! Each enum variant's wire value is its snake_case (or kebab-case, for
//! capabilities) name, which is also what SQLite stores. The macro keeps
//! `as_str`, `FromStr`, serde, and sqlx representations in lockstep so a
//! status can never round-trip to a different value.

use crate::error::CoreError;

macro_rules! define_str_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize, sqlx::Type,
        )]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $val)]
                #[sqlx(rename = $val)]
                $variant,
            )+
        }

        impl $name {
            /// The canonical wire/database value.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $val, )+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        concat!("Unknown ", stringify!($name), ": '{}'"),
                        other,
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_str_enum! {
    /// Lifecycle of a queued generation job.
    JobStatus {
        Pending = "pending",
        Processing = "processing",
        Completed = "completed",
        Failed = "failed",
        Cancelled = "cancelled",
    }
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

define_str_enum! {
    /// What kind of work a job asks for.
    JobType {
        Generate = "generate",
        Edit = "edit",
        Variation = "variation",
        Upscale = "upscale",
    }
}

impl Default for JobType {
    fn default() -> Self {
        Self::Generate
    }
}

define_str_enum! {
    /// Lifecycle of a supervised engine process.
    ProcessStatus {
        Starting = "starting",
        Running = "running",
        Stopping = "stopping",
        Stopped = "stopped",
        Error = "error",
    }
}

define_str_enum! {
    /// Lifecycle of a model download.
    DownloadStatus {
        Pending = "pending",
        Downloading = "downloading",
        Paused = "paused",
        Completed = "completed",
        Failed = "failed",
        Cancelled = "cancelled",
    }
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

define_str_enum! {
    /// How an engine executable is invoked.
    ExecMode {
        /// Long-running child exposing an HTTP endpoint.
        Server = "server",
        /// One-shot invocation per job.
        Cli = "cli",
    }
}

define_str_enum! {
    /// When an engine is started.
    LoadMode {
        OnDemand = "on_demand",
        Preload = "preload",
    }
}

define_str_enum! {
    /// Operations a model supports.
    Capability {
        TextToImage = "text-to-image",
        ImageToImage = "image-to-image",
        Inpaint = "inpaint",
        Upscale = "upscale",
    }
}
