// Port allocation
//
// Bounded pools for backend and frontend dev-server ports. The allocator
// is mutex-guarded in memory; the engine persists every binding to the
// workflow row, and startup reconciles the in-memory view against live
// workflows so a crash cannot leak a port forever.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use foreman_core::config::{PortRange, PortRanges};
use foreman_core::{ForemanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Backend,
    Frontend,
}

impl PortKind {
    fn as_str(&self) -> &'static str {
        match self {
            PortKind::Backend => "backend",
            PortKind::Frontend => "frontend",
        }
    }
}

struct Pool {
    range: PortRange,
    /// port -> owning workflow id
    allocated: BTreeMap<u16, String>,
}

impl Pool {
    fn new(range: PortRange) -> Self {
        Self {
            range,
            allocated: BTreeMap::new(),
        }
    }

    fn allocate(&mut self, workflow_id: &str, kind: PortKind) -> Result<u16> {
        for port in self.range.start..=self.range.end {
            if !self.allocated.contains_key(&port) {
                self.allocated.insert(port, workflow_id.to_string());
                return Ok(port);
            }
        }
        Err(ForemanError::ResourceExhausted(format!(
            "no free {} port in {}-{}",
            kind.as_str(),
            self.range.start,
            self.range.end
        )))
    }

    fn release(&mut self, port: u16) -> bool {
        self.allocated.remove(&port).is_some()
    }
}

/// Mutex-guarded allocator over the two configured port ranges
pub struct PortAllocator {
    backend: Mutex<Pool>,
    frontend: Mutex<Pool>,
}

impl PortAllocator {
    pub fn new(ranges: PortRanges) -> Self {
        Self {
            backend: Mutex::new(Pool::new(ranges.backend)),
            frontend: Mutex::new(Pool::new(ranges.frontend)),
        }
    }

    fn pool(&self, kind: PortKind) -> &Mutex<Pool> {
        match kind {
            PortKind::Backend => &self.backend,
            PortKind::Frontend => &self.frontend,
        }
    }

    /// Claim the lowest free port of the given kind.
    pub fn allocate(&self, kind: PortKind, workflow_id: &str) -> Result<u16> {
        self.pool(kind).lock().allocate(workflow_id, kind)
    }

    /// Return a port to the pool. Unknown ports are ignored.
    pub fn release(&self, kind: PortKind, port: u16) -> bool {
        self.pool(kind).lock().release(port)
    }

    /// Rebuild the in-memory view from persisted bindings of live
    /// workflows. Called once at startup before any allocation.
    pub fn reconcile(&self, bindings: &[(String, Option<u16>, Option<u16>)]) {
        let mut backend = self.backend.lock();
        let mut frontend = self.frontend.lock();
        backend.allocated.clear();
        frontend.allocated.clear();
        for (workflow_id, backend_port, frontend_port) in bindings {
            if let Some(port) = backend_port {
                backend.allocated.insert(*port, workflow_id.clone());
            }
            if let Some(port) = frontend_port {
                frontend.allocated.insert(*port, workflow_id.clone());
            }
        }
    }

    pub fn allocated_count(&self, kind: PortKind) -> usize {
        self.pool(kind).lock().allocated.len()
    }
}
