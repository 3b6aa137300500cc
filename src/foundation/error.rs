//! Crate-wide error and result types.

/// Convenience alias for results produced by this crate.
pub type WeftResult<T> = Result<T, WeftError>;

/// Crate-wide error type.
///
/// The structural variants (`DanglingPort` through `MissingKernel`) are compile-time graph
/// errors: they reject the entire compile call before any device work is issued and always
/// name the offending node, port, pass, or kernel. `DeviceLost` and `Execution` are runtime
/// fatal; recoverable data conditions (missing assets, staged uploads) are never errors and
/// surface as [`crate::exec::engine::RenderWarning`] instead.
#[derive(thiserror::Error, Debug)]
pub enum WeftError {
    /// A connection endpoint names a port that does not exist on its node.
    #[error("no {dir} port `{port}` on node {node}")]
    DanglingPort {
        /// Node label (`type#id`).
        node: String,
        /// `"input"` or `"output"`.
        dir: &'static str,
        /// The missing port name.
        port: String,
    },

    /// The destination input port already has an incoming connection.
    #[error("input port `{port}` on node {node} already has an incoming connection")]
    PortAlreadyBound {
        /// Node label (`type#id`).
        node: String,
        /// The bound port name.
        port: String,
    },

    /// Adding the edge would make the node graph cyclic.
    #[error("connecting {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Source node label.
        from: String,
        /// Destination node label.
        to: String,
    },

    /// Two or more passes of one feature manifest mutually require each other's output.
    #[error("feature `{feature}` has a cyclic pass dependency among {passes:?}")]
    CyclicPassDependency {
        /// Feature id of the offending manifest.
        feature: String,
        /// Pass names participating in the cycle, in declaration order.
        passes: Vec<String>,
    },

    /// A pass reads a name that no pass produces and no external input declares.
    #[error(
        "pass `{pass}` of feature `{feature}` reads `{input}`, which no pass produces and no \
         declared external input provides"
    )]
    UnresolvedIntermediate {
        /// Feature id of the offending manifest.
        feature: String,
        /// Pass consuming the unknown name.
        pass: String,
        /// The unresolved input name.
        input: String,
    },

    /// A logical kernel name is not present in the registry.
    #[error("unknown logical kernel `{name}`; registered logical kernels: {registered:?}")]
    UnknownLogicalName {
        /// The unresolved logical name.
        name: String,
        /// Every registered logical name, sorted.
        registered: Vec<String>,
    },

    /// A concrete kernel is absent from the loaded kernel library.
    #[error("concrete kernel `{name}` is not present in the loaded kernel library")]
    MissingKernel {
        /// The missing concrete kernel name.
        name: String,
    },

    /// The device was lost. Pooled resources are invalid and must be rebuilt by the caller;
    /// the engine never retries automatically.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// A command failed during execution.
    #[error("command execution failed: {0}")]
    Execution(String),

    /// Invalid boundary input (timeline, manifest, options).
    #[error("validation error: {0}")]
    Validation(String),

    /// Wrapped foreign error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WeftError {
    /// Build a [`WeftError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`WeftError::Execution`].
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Build a [`WeftError::DeviceLost`].
    pub fn device_lost(msg: impl Into<String>) -> Self {
        Self::DeviceLost(msg.into())
    }

    /// `true` for compile-time structural errors that reject the whole compile call.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DanglingPort { .. }
                | Self::PortAlreadyBound { .. }
                | Self::CycleDetected { .. }
                | Self::CyclicPassDependency { .. }
                | Self::UnresolvedIntermediate { .. }
                | Self::UnknownLogicalName { .. }
                | Self::MissingKernel { .. }
        )
    }
}
