//! Capability interface over the browser-automation surface.
//!
//! The automation engine never talks to a browser directly. It drives a
//! [`PageDriver`] session through a small set of primitives:
//!
//! - **Navigation**: [`PageDriver::navigate`], [`PageDriver::await_navigation`]
//! - **Lookup**: [`PageDriver::locate`] resolves a selector to an [`ElementHandle`]
//! - **Waits**: [`PageDriver::wait_visible`], [`PageDriver::wait_enabled`]
//! - **Actions**: fill, press, select, click
//! - **Reads**: [`PageDriver::is_checked`], [`PageDriver::count_checked`]
//!
//! Frame lookup, selector dialects and framework loading indicators are the
//! driver's business. Each job opens exactly one session through a
//! [`DriverFactory`] and closes it when the job ends.

pub mod retry;

use std::time::Duration;

use async_trait::async_trait;

pub use retry::RetryPolicy;

use crate::error::DriverError;

/// Opaque reference to an element resolved by a driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Where a lookup or read applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Page,
    Within(ElementHandle),
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Resolve the first element currently matching `selector`, or `None`.
    async fn locate(&self, selector: &str, scope: Scope)
        -> Result<Option<ElementHandle>, DriverError>;

    async fn wait_visible(&self, handle: ElementHandle, timeout: Duration)
        -> Result<(), DriverError>;

    async fn wait_enabled(&self, handle: ElementHandle, timeout: Duration)
        -> Result<(), DriverError>;

    /// Replace the element's value with `text`.
    async fn fill(&self, handle: ElementHandle, text: &str) -> Result<(), DriverError>;

    async fn press(&self, handle: ElementHandle, key: &str) -> Result<(), DriverError>;

    /// Choose the dropdown option whose label (or value) is `label`.
    async fn select_option(&self, handle: ElementHandle, label: &str) -> Result<(), DriverError>;

    /// Click the element. `force` bypasses actionability checks.
    async fn click(&self, handle: ElementHandle, force: bool) -> Result<(), DriverError>;

    async fn is_checked(&self, handle: ElementHandle) -> Result<bool, DriverError>;

    /// Number of checked checkboxes inside `scope`.
    async fn count_checked(&self, scope: Scope) -> Result<usize, DriverError>;

    async fn await_navigation(&self, scope: Scope, timeout: Duration) -> Result<(), DriverError>;

    /// Tear down the session. Called once per job.
    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Opens a fresh driver session for every job.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn PageDriver>, DriverError>;
}
