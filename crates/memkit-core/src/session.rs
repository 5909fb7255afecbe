//! High-level session over an opened target.
//!
//! Bundles the resolver, accessor, patch engine and freeze scheduler behind
//! one handle. Expression-taking methods resolve first and reuse the
//! address-taking variants.

use std::sync::Arc;
use std::time::Duration;

use crate::access;
use crate::address::Address;
use crate::error::{Error, Result};
use crate::freeze::FreezeScheduler;
use crate::patch::{self, DetourPatch, DetourSpec};
use crate::resolve;
use crate::target::TargetMemory;
use crate::value::{Value, ValueKind};

/// Default rewrite interval for frozen values.
pub const DEFAULT_FREEZE_INTERVAL: Duration = Duration::from_millis(25);

pub struct Session<T: TargetMemory + Send + Sync + 'static> {
    target: Arc<T>,
    freezer: FreezeScheduler<T>,
}

impl<T: TargetMemory + Send + Sync + 'static> Session<T> {
    pub fn new(target: T) -> Self {
        let target = Arc::new(target);
        let freezer = FreezeScheduler::new(Arc::clone(&target));
        Session { target, freezer }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Resolve a pointer-path expression; [`Address::NULL`] on failure.
    pub fn resolve(&self, expr: &str) -> Address {
        resolve::resolve(&*self.target, expr)
    }

    pub fn read(&self, expr: &str, kind: &ValueKind) -> Result<Value> {
        self.read_at(self.resolve(expr), kind)
    }

    pub fn read_at(&self, address: Address, kind: &ValueKind) -> Result<Value> {
        access::read_value(&*self.target, address, kind)
    }

    pub fn write(&self, expr: &str, value: &Value) -> Result<()> {
        self.write_at(self.resolve(expr), value, true)
    }

    pub fn write_at(&self, address: Address, value: &Value, protect: bool) -> Result<()> {
        access::write_value(&*self.target, address, value, protect)
    }

    pub fn freeze(&self, expr: &str, value: Value, interval: Duration) -> Result<()> {
        self.freeze_at(self.resolve(expr), value, interval)
    }

    pub fn freeze_at(&self, address: Address, value: Value, interval: Duration) -> Result<()> {
        self.freezer.freeze(address, value, interval)
    }

    pub fn unfreeze(&self, expr: &str) {
        self.unfreeze_at(self.resolve(expr));
    }

    pub fn unfreeze_at(&self, address: Address) {
        self.freezer.unfreeze(address);
    }

    pub fn is_frozen(&self, address: Address) -> bool {
        self.freezer.is_frozen(address)
    }

    /// Splice a detour at the address the expression resolves to.
    pub fn create_detour(&self, expr: &str, spec: &DetourSpec<'_>) -> Result<DetourPatch> {
        let source = self.resolve(expr);
        if source.is_null() {
            return Err(Error::InvalidAddress(source.get()));
        }
        patch::create_detour(&*self.target, source, spec)
    }

    /// Stop all freeze workers. Also runs on drop.
    pub fn shutdown(&self) {
        self.freezer.shutdown();
    }
}
