//! Test harness for engine, worker and app tests.
//!
//! Provides a scripted in-memory portal that implements `PageDriver`, a
//! factory handing out sessions on it, and helpers for building sheets.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use dutysync::config::{EngineConfig, PortalConfig, PortalSelectors, RetryPolicy};
use dutysync::driver::{DriverFactory, ElementHandle, PageDriver, Scope};
use dutysync::error::{DriverError, SheetError};
use dutysync::sheet::{CellValue, JsonSheetCodec, Row, Sheet, SheetCodec};

pub const LOGIN_URL: &str = "https://portal.test/login";
pub const VESSEL: &str = "MV Sagar";

const USERNAME: u64 = 1;
const PASSWORD: u64 = 2;
const LOGIN_BUTTON: u64 = 3;
const VESSEL_DROPDOWN: u64 = 4;
const SEARCH: u64 = 5;
const BULK_MENU: u64 = 6;
const BULK_OFF: u64 = 7;
const BULK_ON: u64 = 8;
const FILTERS: u64 = 9;
const STATUS_FILTER: u64 = 10;
const USER_MENU: u64 = 11;
const LOGOUT: u64 = 12;
const ROW_BASE: u64 = 1_000;
const CHECKBOX_BASE: u64 = 100_000;

/// One bulk action as the portal saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCall {
    pub mode: &'static str,
    pub identifiers: Vec<String>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct PortalState {
    people: Vec<String>,
    unselectable: HashSet<String>,
    needs_force: HashSet<String>,
    disabled_polls: HashMap<String, u32>,
    failing_bulk_calls: HashSet<usize>,
    known_vessels: HashSet<String>,
    fail_login: bool,
    hanging_searches: HashSet<String>,
    sticky_selection: bool,

    pending_search: String,
    search: String,
    checked: HashSet<String>,
    logged_in: bool,
    logged_out: bool,
    vessel: Option<String>,
    duty: HashMap<String, &'static str>,
    bulk_calls: Vec<BulkCall>,
    pre_filters: usize,
    navigations: usize,
}

/// Scripted portal. Clones share state, so a test keeps one handle while
/// the engine drives another.
#[derive(Clone, Default)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
    calls: Arc<AtomicUsize>,
    selectors: Arc<PortalSelectors>,
}

impl FakePortal {
    /// Portal listing `people`, with [`VESSEL`] selectable.
    pub fn new<S: AsRef<str>>(people: &[S]) -> Self {
        let portal = Self::default();
        {
            let mut state = portal.state();
            state.people = people.iter().map(|p| p.as_ref().to_string()).collect();
            state.known_vessels.insert(VESSEL.to_string());
        }
        portal
    }

    fn state(&self) -> MutexGuard<'_, PortalState> {
        self.state.lock().unwrap()
    }

    /// Checkbox for `id` never registers a click.
    pub fn unselectable(self, id: &str) -> Self {
        self.state().unselectable.insert(id.to_string());
        self
    }

    /// Checkbox for `id` only registers a forced click.
    pub fn needs_force(self, id: &str) -> Self {
        self.state().needs_force.insert(id.to_string());
        self
    }

    /// Checkbox for `id` reports disabled for the first `polls` waits.
    pub fn disabled_for(self, id: &str, polls: u32) -> Self {
        self.state().disabled_polls.insert(id.to_string(), polls);
        self
    }

    /// The `n`th bulk action (1-based) is rejected.
    pub fn fail_bulk_call(self, n: usize) -> Self {
        self.state().failing_bulk_calls.insert(n);
        self
    }

    /// Typing `id` into the search box never returns.
    pub fn hang_on_search(self, id: &str) -> Self {
        self.state().hanging_searches.insert(id.to_string());
        self
    }

    /// Bulk actions apply but leave the rows checked, so the page never settles.
    pub fn sticky_selection(self) -> Self {
        self.state().sticky_selection = true;
        self
    }

    pub fn fail_login(self) -> Self {
        self.state().fail_login = true;
        self
    }

    pub fn without_vessels(self) -> Self {
        self.state().known_vessels.clear();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> Vec<BulkCall> {
        self.state().bulk_calls.clone()
    }

    pub fn pre_filters(&self) -> usize {
        self.state().pre_filters
    }

    pub fn navigations(&self) -> usize {
        self.state().navigations
    }

    pub fn duty_of(&self, id: &str) -> Option<&'static str> {
        self.state().duty.get(id).copied()
    }

    pub fn logged_out(&self) -> bool {
        self.state().logged_out
    }

    pub fn selected_vessel(&self) -> Option<String> {
        self.state().vessel.clone()
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn person_index(state: &PortalState, id: &str) -> Option<u64> {
        state.people.iter().position(|p| p == id).map(|i| i as u64)
    }

    fn checkbox_owner(state: &PortalState, handle: ElementHandle) -> Option<String> {
        handle
            .0
            .checked_sub(CHECKBOX_BASE)
            .and_then(|i| state.people.get(i as usize))
            .cloned()
    }

    fn bulk(&self, state: &mut PortalState, mode: &'static str) -> Result<(), DriverError> {
        let call = state.bulk_calls.len() + 1;
        let mut identifiers: Vec<String> = if state.sticky_selection {
            state.checked.iter().cloned().collect()
        } else {
            state.checked.drain().collect()
        };
        identifiers.sort();
        let succeeded = !state.failing_bulk_calls.contains(&call);
        if succeeded {
            for id in &identifiers {
                state.duty.insert(id.clone(), mode);
            }
        }
        state.bulk_calls.push(BulkCall {
            mode,
            identifiers,
            succeeded,
        });
        if succeeded {
            Ok(())
        } else {
            Err(DriverError::Action("bulk action rejected".to_string()))
        }
    }
}

#[async_trait]
impl PageDriver for FakePortal {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.hit();
        let mut state = self.state();
        state.navigations += 1;
        if state.fail_login || url != LOGIN_URL {
            return Err(DriverError::Action(format!("cannot reach {url}")));
        }
        Ok(())
    }

    async fn locate(
        &self,
        selector: &str,
        scope: Scope,
    ) -> Result<Option<ElementHandle>, DriverError> {
        self.hit();
        let s = &self.selectors;
        let state = self.state();

        if let Scope::Within(row) = scope {
            if selector != s.row_checkbox {
                return Ok(None);
            }
            let index = row.0.checked_sub(ROW_BASE);
            return Ok(index
                .filter(|i| (*i as usize) < state.people.len())
                .map(|i| ElementHandle(CHECKBOX_BASE + i)));
        }

        let fixed = [
            (&s.username, USERNAME),
            (&s.password, PASSWORD),
            (&s.login_button, LOGIN_BUTTON),
            (&s.vessel_dropdown, VESSEL_DROPDOWN),
            (&s.search_input, SEARCH),
            (&s.bulk_actions, BULK_MENU),
            (&s.bulk_off_duty, BULK_OFF),
            (&s.bulk_on_duty, BULK_ON),
            (&s.filters_toggle, FILTERS),
            (&s.status_filter, STATUS_FILTER),
            (&s.user_menu, USER_MENU),
            (&s.logout, LOGOUT),
        ];
        if let Some((_, handle)) = fixed.iter().find(|(sel, _)| sel.as_str() == selector) {
            return Ok(Some(ElementHandle(*handle)));
        }

        if state.search.is_empty() {
            return Ok(None);
        }
        if selector == s.row_selector(&state.search) {
            return Ok(Self::person_index(&state, &state.search).map(|i| ElementHandle(ROW_BASE + i)));
        }
        Ok(None)
    }

    async fn wait_visible(&self, _handle: ElementHandle, _timeout: Duration) -> Result<(), DriverError> {
        self.hit();
        Ok(())
    }

    async fn wait_enabled(&self, handle: ElementHandle, timeout: Duration) -> Result<(), DriverError> {
        self.hit();
        let mut state = self.state();
        let Some(id) = Self::checkbox_owner(&state, handle) else {
            return Ok(());
        };
        match state.disabled_polls.get_mut(&id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(DriverError::timeout("checkbox enabled", timeout))
            }
            _ => Ok(()),
        }
    }

    async fn fill(&self, handle: ElementHandle, text: &str) -> Result<(), DriverError> {
        self.hit();
        if handle.0 != SEARCH {
            return Ok(());
        }
        let hangs = {
            let mut state = self.state();
            state.pending_search = text.to_string();
            state.hanging_searches.contains(text)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn press(&self, handle: ElementHandle, key: &str) -> Result<(), DriverError> {
        self.hit();
        if handle.0 == SEARCH && key == "Enter" {
            let mut state = self.state();
            state.search = state.pending_search.clone();
        }
        Ok(())
    }

    async fn select_option(&self, handle: ElementHandle, label: &str) -> Result<(), DriverError> {
        self.hit();
        let mut state = self.state();
        match handle.0 {
            VESSEL_DROPDOWN => {
                if !state.known_vessels.contains(label) {
                    return Err(DriverError::NotFound(format!("option {label}")));
                }
                state.vessel = Some(label.to_string());
                Ok(())
            }
            STATUS_FILTER => {
                state.pre_filters += 1;
                Ok(())
            }
            _ => Err(DriverError::Action("not a dropdown".to_string())),
        }
    }

    async fn click(&self, handle: ElementHandle, force: bool) -> Result<(), DriverError> {
        self.hit();
        let mut state = self.state();
        match handle.0 {
            LOGIN_BUTTON => {
                state.logged_in = true;
                Ok(())
            }
            BULK_OFF => self.bulk(&mut state, "OFF"),
            BULK_ON => self.bulk(&mut state, "ON"),
            LOGOUT => {
                state.logged_in = false;
                state.logged_out = true;
                Ok(())
            }
            _ => {
                if let Some(id) = Self::checkbox_owner(&state, handle) {
                    let registers = !state.unselectable.contains(&id)
                        && (force || !state.needs_force.contains(&id));
                    if registers {
                        state.checked.insert(id);
                    }
                }
                Ok(())
            }
        }
    }

    async fn is_checked(&self, handle: ElementHandle) -> Result<bool, DriverError> {
        self.hit();
        let state = self.state();
        Ok(Self::checkbox_owner(&state, handle).is_some_and(|id| state.checked.contains(&id)))
    }

    async fn count_checked(&self, _scope: Scope) -> Result<usize, DriverError> {
        self.hit();
        Ok(self.state().checked.len())
    }

    async fn await_navigation(&self, _scope: Scope, _timeout: Duration) -> Result<(), DriverError> {
        self.hit();
        Ok(())
    }
}

/// Hands out sessions on one shared [`FakePortal`].
pub struct FakeDriverFactory {
    pub portal: FakePortal,
    sessions: AtomicUsize,
    fail_open: bool,
}

impl FakeDriverFactory {
    pub fn new(portal: FakePortal) -> Self {
        Self {
            portal,
            sessions: AtomicUsize::new(0),
            fail_open: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(FakePortal::default())
        }
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverFactory for FakeDriverFactory {
    async fn open_session(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        if self.fail_open {
            return Err(DriverError::Action("browser failed to launch".to_string()));
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.portal.clone()))
    }
}

/// Sheet codec that holds every read until [`GatedCodec::open`] is called.
#[derive(Clone)]
pub struct GatedCodec {
    gate: Arc<tokio::sync::Semaphore>,
}

impl GatedCodec {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1_000);
    }
}

#[async_trait]
impl SheetCodec for GatedCodec {
    async fn read(&self, path: &Path) -> Result<Sheet, SheetError> {
        let _permit = self.gate.acquire().await.unwrap();
        JsonSheetCodec.read(path).await
    }

    async fn write(&self, path: &Path, sheet: &Sheet) -> Result<(), SheetError> {
        JsonSheetCodec.write(path, sheet).await
    }
}

/// Sheet codec whose `n`th write (1-based) fails.
pub struct FailingWriteCodec {
    fail_on: usize,
    writes: AtomicUsize,
}

impl FailingWriteCodec {
    pub fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SheetCodec for FailingWriteCodec {
    async fn read(&self, path: &Path) -> Result<Sheet, SheetError> {
        JsonSheetCodec.read(path).await
    }

    async fn write(&self, path: &Path, sheet: &Sheet) -> Result<(), SheetError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(SheetError::Io(std::io::Error::other("disk full")));
        }
        JsonSheetCodec.write(path, sheet).await
    }
}

/// Engine settings with no delays and small attempt counts.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        batch_size: 10,
        action_timeout: Duration::from_secs(1),
        visible_timeout: Duration::from_secs(1),
        navigation_timeout: Duration::from_secs(1),
        navigation: RetryPolicy::new(3, Duration::ZERO),
        control_wait: RetryPolicy::new(3, Duration::ZERO),
        row_wait: RetryPolicy::new(3, Duration::ZERO),
        enable_poll: RetryPolicy::new(5, Duration::ZERO),
        check_confirm: RetryPolicy::new(2, Duration::ZERO),
        bulk_settle: RetryPolicy::new(3, Duration::ZERO),
    }
}

/// [`fast_engine_config`] with every driver action capped at `limit`.
pub fn engine_config_with_action_timeout(limit: Duration) -> EngineConfig {
    EngineConfig {
        action_timeout: limit,
        visible_timeout: limit,
        navigation_timeout: limit,
        ..fast_engine_config()
    }
}

pub fn test_portal_config() -> PortalConfig {
    PortalConfig::new(LOGIN_URL, "officer", "secret")
}

pub fn header() -> Vec<String> {
    vec!["NED".to_string(), "Name".to_string()]
}

/// Rows keyed by `NED`, one per identifier.
pub fn rows(ids: &[&str]) -> Vec<Row> {
    let header = header();
    ids.iter()
        .map(|id| Row::from_cells(&header, &[json!(id), json!(format!("Crew {id}"))]))
        .collect()
}

/// Identifiers `prefix1..=prefixN`.
pub fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{prefix}{i}")).collect()
}

pub fn as_strs(ids: &[String]) -> Vec<&str> {
    ids.iter().map(String::as_str).collect()
}

pub fn sheet(ids: &[&str]) -> Sheet {
    Sheet {
        header: header(),
        rows: ids
            .iter()
            .map(|id| vec![json!(id), json!(format!("Crew {id}"))])
            .collect(),
    }
}

pub async fn write_sheet(dir: &Path, name: &str, ids: &[&str]) -> PathBuf {
    let path = dir.join(name);
    JsonSheetCodec.write(&path, &sheet(ids)).await.unwrap();
    path
}

pub async fn read_identifiers(path: &Path) -> Vec<String> {
    let sheet = JsonSheetCodec.read(path).await.unwrap();
    sheet
        .rows
        .iter()
        .map(|cells| match cells.first() {
            Some(CellValue::String(s)) => s.clone(),
            other => panic!("unexpected identifier cell {other:?}"),
        })
        .collect()
}

/// Identifier column values of `rows`.
pub fn identifiers_of(rows: &[Row]) -> Vec<String> {
    rows.iter().map(|r| r.identifier("NED")).collect()
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout_duration;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert that a condition becomes true within timeout
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
