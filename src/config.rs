use std::path::PathBuf;
use std::time::Duration;

pub use crate::driver::RetryPolicy;

/// Placeholder substituted with the identifier in [`PortalSelectors::row_template`].
pub const ID_PLACEHOLDER: &str = "{id}";

/// Selectors the engine hands to the page driver.
///
/// They are opaque to the engine; the driver decides how to interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSelectors {
    pub username: String,
    pub password: String,
    pub login_button: String,
    pub vessel_dropdown: String,
    pub search_input: String,
    /// Table row containing an identifier. Must contain [`ID_PLACEHOLDER`].
    pub row_template: String,
    /// Checkbox inside a matched row.
    pub row_checkbox: String,
    pub bulk_actions: String,
    pub bulk_off_duty: String,
    pub bulk_on_duty: String,
    pub filters_toggle: String,
    pub status_filter: String,
    /// Option chosen in `status_filter` before marking rows ON duty.
    pub status_filter_value: String,
    pub user_menu: String,
    pub logout: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            username: r#"input#cpfno, input[name="cpfno"]"#.to_string(),
            password: r#"input#password, input[name="password"]"#.to_string(),
            login_button: r#"button[type="submit"], input[type="submit"]"#.to_string(),
            vessel_dropdown: r#"select[name="location"]"#.to_string(),
            search_input: r#"input[placeholder="Search"]"#.to_string(),
            row_template: r#"table tbody tr:has-text("{id}")"#.to_string(),
            row_checkbox: r#"input[type="checkbox"]"#.to_string(),
            bulk_actions: "#table-bulkActionsDropdown".to_string(),
            bulk_off_duty: r#"a:has-text("Bulk Assign OFF DUTY")"#.to_string(),
            bulk_on_duty: r#"a:has-text("Bulk Assign ON DUTY")"#.to_string(),
            filters_toggle: r#"button.dropdown-toggle:has-text("Filters")"#.to_string(),
            status_filter: r#"select:has(option[value="OFF DUTY"])"#.to_string(),
            status_filter_value: "OFF DUTY".to_string(),
            user_menu: "a#navbarDropdown".to_string(),
            logout: r#"a.dropdown-item[href$="/logout"]"#.to_string(),
        }
    }
}

impl PortalSelectors {
    /// Selector for the table row showing `identifier`.
    pub fn row_selector(&self, identifier: &str) -> String {
        self.row_template.replace(ID_PLACEHOLDER, identifier)
    }
}

/// Where the portal lives and how to sign in.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub login_url: String,
    pub username: String,
    pub password: String,
    pub selectors: PortalSelectors,
}

impl PortalConfig {
    pub fn new(
        login_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            login_url: login_url.into(),
            username: username.into(),
            password: password.into(),
            selectors: PortalSelectors::default(),
        }
    }

    pub fn with_selectors(mut self, selectors: PortalSelectors) -> Self {
        self.selectors = selectors;
        self
    }
}

/// Timeouts and retry budgets for the automation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rows per bulk action.
    pub batch_size: usize,
    /// Cap on any single driver action (fill, click, reads).
    pub action_timeout: Duration,
    /// Budget for `wait_visible` once an element has been located.
    pub visible_timeout: Duration,
    /// Budget for `await_navigation`.
    pub navigation_timeout: Duration,
    /// Retries of the initial navigation to the login page.
    pub navigation: RetryPolicy,
    /// Polling for page controls (login form, dropdowns, menus) to appear.
    pub control_wait: RetryPolicy,
    /// Polling for a searched row to render.
    pub row_wait: RetryPolicy,
    /// Attempts at waiting for a row checkbox to become enabled.
    pub enable_poll: RetryPolicy,
    /// Polling for a click to register as checked.
    pub check_confirm: RetryPolicy,
    /// Polling for the selection to clear after a bulk action.
    pub bulk_settle: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            action_timeout: Duration::from_secs(30),
            visible_timeout: Duration::from_secs(60),
            navigation_timeout: Duration::from_secs(60),
            navigation: RetryPolicy::new(3, Duration::from_secs(2)),
            control_wait: RetryPolicy::new(40, Duration::from_millis(250)),
            row_wait: RetryPolicy::new(40, Duration::from_millis(500)),
            enable_poll: RetryPolicy::new(10, Duration::from_millis(500)),
            check_confirm: RetryPolicy::new(4, Duration::from_millis(500)),
            bulk_settle: RetryPolicy::new(20, Duration::from_millis(500)),
        }
    }
}

impl EngineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Worker pool and queue sizing.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of parallel workers; each runs one job at a time.
    pub pool_size: usize,
    /// Maximum number of queued job ids awaiting a worker.
    pub queue_capacity: usize,
    /// Safety net around a whole automation run.
    pub run_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            queue_capacity: 100,
            run_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// How long job data is kept and how often it is swept.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub retention: Duration,
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(6 * 60 * 60),
            interval: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directory holding one subdirectory per job.
    pub data_dir: PathBuf,
    pub portal: PortalConfig,
    pub engine: EngineConfig,
    pub worker: WorkerConfig,
    pub retention: RetentionConfig,
}

impl AppConfig {
    pub fn new(data_dir: impl Into<PathBuf>, portal: PortalConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            portal,
            engine: EngineConfig::default(),
            worker: WorkerConfig::default(),
            retention: RetentionConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }
}
