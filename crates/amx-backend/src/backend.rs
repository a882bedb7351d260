use std::any::Any;
use std::sync::Arc;

use amx_tensor::{
    Backend, BackendRegistry, BufferType, Graph, GraphNode, Guid, Op, Status,
};

use crate::buffer::{amx_buffer_type, AMX_NAME};
use crate::config::BackendConfig;
use crate::context::BackendContext;
use crate::eligibility;
use crate::error::Result;
use crate::kernel::{MatMulKernel, PackedReferenceKernel};
use crate::tile::TileUnit;

/// Stable identity of the AMX backend.
pub const AMX_GUID: Guid = Guid([
    0x13, 0xb8, 0xa4, 0xc4, 0xba, 0xfe, 0x51, 0x67, 0x87, 0x44, 0x55, 0x15, 0xb2, 0x35, 0x62, 0x3e,
]);

/// A backend instance: its context, the tile unit it drives and the kernel
/// that computes `MulMat` nodes.
#[derive(Debug)]
pub struct AmxBackend {
    ctx: BackendContext,
    config: BackendConfig,
    tiles: Arc<dyn TileUnit>,
    kernel: Arc<dyn MatMulKernel>,
    capable: bool,
}

impl AmxBackend {
    /// Build a backend on an explicit tile unit. The capability request is
    /// made here, once per instance.
    pub fn with_tile_unit(config: BackendConfig, tiles: Arc<dyn TileUnit>) -> Result<Self> {
        let capable = tiles.request_permission();
        if !capable {
            if config.strict_capability {
                log::warn!("AMX capability denied: no operation will be offloaded");
            } else {
                log::warn!("AMX capability denied: continuing in permissive mode");
            }
        }
        let ctx = BackendContext::new(config.n_threads)?;
        log::info!(
            "AMX backend ready: {} threads, strict capability {}",
            config.n_threads,
            config.strict_capability
        );
        Ok(AmxBackend {
            ctx,
            config,
            tiles,
            kernel: Arc::new(PackedReferenceKernel),
            capable,
        })
    }

    /// Replace the matmul kernel.
    pub fn with_kernel(mut self, kernel: Arc<dyn MatMulKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn context(&self) -> &BackendContext {
        &self.ctx
    }

    /// Whether the capability gate granted tile access to this instance.
    pub fn is_capable(&self) -> bool {
        self.capable
    }

    fn capability_ok(&self) -> bool {
        self.capable || !self.config.strict_capability
    }

    pub fn set_n_threads(&mut self, n_threads: usize) -> Result<()> {
        self.ctx.set_n_threads(n_threads)?;
        self.config.n_threads = n_threads;
        Ok(())
    }

    fn compute_mul_mat(&self, node: &GraphNode) -> Status {
        if !self.capability_ok() {
            log::error!(
                "MUL_MAT '{}' routed to AMX after the capability request was denied",
                node.output().name()
            );
            panic!("AMX kernel invoked without tile capability");
        }
        match self.kernel.mul_mat(&self.ctx, self.tiles.as_ref(), node) {
            Ok(()) => Status::Success,
            Err(e) => {
                log::error!("MUL_MAT '{}' failed: {}", node.output().name(), e);
                Status::Failed
            }
        }
    }
}

impl Backend for AmxBackend {
    fn guid(&self) -> Guid {
        AMX_GUID
    }

    fn name(&self) -> &str {
        AMX_NAME
    }

    fn default_buffer_type(&self) -> &'static dyn BufferType {
        amx_buffer_type()
    }

    fn graph_compute(&mut self, graph: &Graph) -> Status {
        for node in graph.nodes() {
            match node.op() {
                Op::MulMat => {
                    let status = self.compute_mul_mat(node);
                    if status != Status::Success {
                        return status;
                    }
                }
                op if op.is_structural() => {}
                op => {
                    log::error!(
                        "{} node '{}' routed to the AMX backend",
                        op,
                        node.output().name()
                    );
                    panic!("AMX backend does not support op {}", op);
                }
            }
        }
        Status::Success
    }

    fn supports_op(&self, node: &GraphNode) -> bool {
        eligibility::supports_op(node, self.capability_ok())
    }

    fn supports_buffer_type(&self, buft: &dyn BufferType) -> bool {
        eligibility::supports_buffer_type(buft)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Create an AMX backend on the hardware tile unit.
///
/// `params` is parsed by [`BackendConfig::parse`]. Returns `None` when the
/// parameters are invalid, the worker pool cannot be built, or the build has
/// no AMX support.
pub fn init(params: Option<&str>) -> Option<AmxBackend> {
    let config = match BackendConfig::parse(params) {
        Ok(config) => config,
        Err(e) => {
            log::error!("AMX backend init failed: {}", e);
            return None;
        }
    };
    match init_with_config(config) {
        Ok(backend) => Some(backend),
        Err(e) => {
            log::error!("AMX backend init failed: {}", e);
            None
        }
    }
}

/// Create an AMX backend from an already parsed configuration.
///
/// # Errors
/// Returns `ThreadPool` when the worker pool cannot be built.
#[cfg(target_arch = "x86_64")]
pub fn init_with_config(config: BackendConfig) -> Result<AmxBackend> {
    use crate::tile::HardwareTiles;

    AmxBackend::with_tile_unit(config, Arc::new(HardwareTiles::new()))
}

/// # Errors
/// Always returns `Unsupported`: this build has no AMX support.
#[cfg(not(target_arch = "x86_64"))]
pub fn init_with_config(_config: BackendConfig) -> Result<AmxBackend> {
    Err(crate::error::BackendError::Unsupported(
        "not compiled with AMX support".to_string(),
    ))
}

fn factory(params: Option<&str>) -> Option<Box<dyn Backend>> {
    init(params).map(|b| Box::new(b) as Box<dyn Backend>)
}

/// Add the AMX entry to `registry`.
pub fn register(registry: &mut BackendRegistry) {
    if cfg!(target_arch = "x86_64") {
        registry.register(AMX_NAME, factory, amx_buffer_type());
    } else {
        log::error!("AMX backend register: not compiled with AMX support");
    }
}

pub fn is_amx(backend: &dyn Backend) -> bool {
    backend.guid() == AMX_GUID
}

/// Set the worker count of an AMX backend.
///
/// Without AMX support compiled in this only logs an error.
///
/// # Panics
/// Panics if `backend` is not an AMX backend or `n_threads` is zero.
pub fn set_n_threads(backend: &mut dyn Backend, n_threads: usize) {
    if !cfg!(target_arch = "x86_64") {
        log::error!("AMX backend set_n_threads: not compiled with AMX support");
        return;
    }
    assert!(is_amx(backend), "set_n_threads called on a non-AMX backend");
    let Some(amx) = backend.as_any_mut().downcast_mut::<AmxBackend>() else {
        panic!("backend reports the AMX GUID but is not an AmxBackend");
    };
    if let Err(e) = amx.set_n_threads(n_threads) {
        log::error!("AMX backend set_n_threads: {}", e);
        panic!("invalid thread count {}", n_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::EmulatedTiles;
    use amx_tensor::{DType, Shape, Tensor};

    fn backend(tiles: EmulatedTiles, strict: bool) -> AmxBackend {
        let config = BackendConfig {
            n_threads: 2,
            strict_capability: strict,
        };
        AmxBackend::with_tile_unit(config, Arc::new(tiles)).unwrap()
    }

    fn mul_mat_node() -> GraphNode {
        let t = |name: &str, dtype: DType, dims: Vec<usize>| {
            Arc::new(Tensor::new(name, dtype, Shape::new(dims)).unwrap())
        };
        GraphNode::mul_mat(
            t("w", DType::Q4_0, vec![32, 32]),
            t("x", DType::F32, vec![1, 32]),
            t("out", DType::F32, vec![1, 32]),
        )
    }

    #[test]
    fn test_identity() {
        let b = backend(EmulatedTiles::new(), true);
        assert_eq!(b.guid(), AMX_GUID);
        assert_eq!(b.guid().to_string(), "13b8a4c4bafe516787445515b235623e");
        assert_eq!(b.name(), "AMX");
        assert_eq!(b.default_buffer_type().name(), "AMX");
        assert!(is_amx(&b));
        assert!(b.is_capable());
    }

    #[test]
    fn test_strict_denial_rejects_everything() {
        let b = backend(EmulatedTiles::denied(), true);
        assert!(!b.is_capable());
        assert!(!b.supports_op(&mul_mat_node()));
    }

    #[test]
    fn test_permissive_denial_keeps_eligibility() {
        let b = backend(EmulatedTiles::denied(), false);
        assert!(b.supports_op(&mul_mat_node()));
    }

    #[test]
    #[should_panic(expected = "without tile capability")]
    fn test_strict_denial_mul_mat_is_fatal() {
        let mut b = backend(EmulatedTiles::denied(), true);
        b.graph_compute(&Graph::new().with(mul_mat_node()));
    }

    /// A backend with a foreign identity.
    #[derive(Debug)]
    struct OtherBackend;

    impl Backend for OtherBackend {
        fn guid(&self) -> Guid {
            Guid([0; 16])
        }

        fn name(&self) -> &str {
            "other"
        }

        fn default_buffer_type(&self) -> &'static dyn BufferType {
            amx_tensor::host_buffer_type()
        }

        fn graph_compute(&mut self, _graph: &Graph) -> Status {
            Status::Success
        }

        fn supports_op(&self, _node: &GraphNode) -> bool {
            false
        }

        fn supports_buffer_type(&self, _buft: &dyn BufferType) -> bool {
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_set_n_threads_through_trait_object() {
        let mut b: Box<dyn Backend> = Box::new(backend(EmulatedTiles::new(), true));
        set_n_threads(b.as_mut(), 3);
        let amx = b.as_any().downcast_ref::<AmxBackend>().unwrap();
        let expected = if cfg!(target_arch = "x86_64") { 3 } else { 2 };
        assert_eq!(amx.context().n_threads(), expected);
        assert_eq!(amx.config().n_threads, expected);
    }

    #[test]
    fn test_set_n_threads_on_foreign_backend() {
        let mut other = OtherBackend;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            set_n_threads(&mut other, 4);
        }));
        // Builds without AMX support only log.
        assert_eq!(result.is_err(), cfg!(target_arch = "x86_64"));
    }

    #[test]
    fn test_register_adds_amx_entry() {
        let mut reg = BackendRegistry::new();
        register(&mut reg);
        if cfg!(target_arch = "x86_64") {
            let entry = reg.find("AMX").unwrap();
            assert_eq!(entry.buffer_type.name(), "AMX");
        } else {
            assert!(reg.is_empty());
        }
    }

    #[test]
    fn test_init_rejects_bad_params() {
        assert!(init(Some("n_threads=0")).is_none());
    }

    #[test]
    fn test_init_with_config() {
        let config = BackendConfig {
            n_threads: 1,
            strict_capability: false,
        };
        let result = init_with_config(config);
        if cfg!(target_arch = "x86_64") {
            assert_eq!(result.unwrap().context().n_threads(), 1);
        } else {
            assert!(matches!(
                result,
                Err(crate::error::BackendError::Unsupported(_))
            ));
        }
    }
}
