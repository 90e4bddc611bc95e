use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::driver::{ElementHandle, PageDriver, Scope};
use crate::engine::{AutomationEngine, DutyMode, RowState};
use crate::error::{BulkApplyError, DriverError, SelectError};

const ENTER: &str = "Enter";

impl AutomationEngine {
    /// Cap `fut` at `limit`; an overrun is a timeout on `what`.
    async fn bounded<T, Fut>(&self, what: &str, limit: Duration, fut: Fut) -> Result<T, DriverError>
    where
        Fut: Future<Output = Result<T, DriverError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::timeout(what, limit)),
        }
    }

    async fn act<T, Fut>(&self, what: &str, fut: Fut) -> Result<T, DriverError>
    where
        Fut: Future<Output = Result<T, DriverError>>,
    {
        self.bounded(what, self.config.action_timeout, fut).await
    }

    async fn wait_visible(
        &self,
        driver: &dyn PageDriver,
        what: &str,
        handle: ElementHandle,
    ) -> Result<(), DriverError> {
        let limit = self.config.visible_timeout;
        self.bounded(
            what,
            limit + self.config.action_timeout,
            driver.wait_visible(handle, limit),
        )
        .await
    }

    /// Poll for `selector` under `policy`, then wait for it to be visible.
    async fn wait_for(
        &self,
        driver: &dyn PageDriver,
        selector: &str,
        scope: Scope,
        policy: RetryPolicy,
    ) -> Result<ElementHandle, DriverError> {
        let handle = policy
            .poll(selector, move || self.act(selector, driver.locate(selector, scope)))
            .await?;
        self.wait_visible(driver, selector, handle).await?;
        Ok(handle)
    }

    async fn await_navigation(&self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let limit = self.config.navigation_timeout;
        self.bounded(
            "navigation",
            limit + self.config.action_timeout,
            driver.await_navigation(Scope::Page, limit),
        )
        .await
    }

    pub(super) async fn login(&self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let selectors = &self.portal.selectors;
        let url = self.portal.login_url.as_str();
        let limit = self.config.navigation_timeout;

        self.config
            .navigation
            .run("login page", move |attempt| {
                tracing::debug!(url, attempt, "Opening login page");
                self.bounded("login page", limit, driver.navigate(url))
            })
            .await?;

        let control_wait = self.config.control_wait;
        let username = self
            .wait_for(driver, &selectors.username, Scope::Page, control_wait)
            .await?;
        let password = self
            .wait_for(driver, &selectors.password, Scope::Page, control_wait)
            .await?;
        let submit = self
            .wait_for(driver, &selectors.login_button, Scope::Page, control_wait)
            .await?;

        self.act("fill username", driver.fill(username, &self.portal.username))
            .await?;
        self.act("fill password", driver.fill(password, &self.portal.password))
            .await?;
        self.act("submit login", driver.click(submit, false)).await?;

        if let Err(e) = self.await_navigation(driver).await {
            tracing::debug!(error = %e, "No navigation after login submit");
        }
        Ok(())
    }

    pub(super) async fn select_vessel(
        &self,
        driver: &dyn PageDriver,
        vessel: &str,
    ) -> Result<(), DriverError> {
        let dropdown = self
            .wait_for(
                driver,
                &self.portal.selectors.vessel_dropdown,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("select vessel", driver.select_option(dropdown, vessel))
            .await?;
        self.await_navigation(driver).await
    }

    /// Narrow the table to off-duty personnel.
    pub(super) async fn apply_pre_filter(&self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let selectors = &self.portal.selectors;
        let toggle = self
            .wait_for(
                driver,
                &selectors.filters_toggle,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("open filters", driver.click(toggle, false)).await?;

        let status = self
            .wait_for(
                driver,
                &selectors.status_filter,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act(
            "select status filter",
            driver.select_option(status, &selectors.status_filter_value),
        )
        .await
    }

    async fn clear_search(&self, driver: &dyn PageDriver) {
        if let Err(e) = self.try_clear_search(driver).await {
            tracing::debug!(error = %e, "Could not clear search");
        }
    }

    async fn try_clear_search(&self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let selector = &self.portal.selectors.search_input;
        let Some(search) = self
            .act("locate search", driver.locate(selector, Scope::Page))
            .await?
        else {
            return Ok(());
        };
        self.wait_visible(driver, selector, search).await?;
        self.act("clear search", driver.fill(search, "")).await?;
        self.act("submit search", driver.press(search, ENTER)).await
    }

    /// Find the row for `identifier` and tick its checkbox.
    pub(super) async fn search_and_select(
        &self,
        driver: &dyn PageDriver,
        identifier: &str,
        state: &mut RowState,
    ) -> Result<(), SelectError> {
        let selectors = &self.portal.selectors;
        self.clear_search(driver).await;

        let search = self
            .wait_for(
                driver,
                &selectors.search_input,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("fill search", driver.fill(search, identifier))
            .await?;
        self.act("submit search", driver.press(search, ENTER))
            .await?;

        let row_selector = selectors.row_selector(identifier);
        let row_selector = row_selector.as_str();
        let row = match self
            .config
            .row_wait
            .poll(row_selector, move || {
                self.act("locate row", driver.locate(row_selector, Scope::Page))
            })
            .await
        {
            Ok(row) => row,
            Err(e) if e.is_timeout() => return Err(SelectError::NoMatch(identifier.to_string())),
            Err(e) => return Err(e.into()),
        };
        self.wait_visible(driver, row_selector, row).await?;
        *state = RowState::Searched;

        self.select_checkbox(driver, row, identifier).await?;
        *state = RowState::Selected;
        Ok(())
    }

    async fn select_checkbox(
        &self,
        driver: &dyn PageDriver,
        row: ElementHandle,
        identifier: &str,
    ) -> Result<(), SelectError> {
        let selector = &self.portal.selectors.row_checkbox;
        let checkbox = self
            .act("locate checkbox", driver.locate(selector, Scope::Within(row)))
            .await?
            .ok_or_else(|| DriverError::NotFound(selector.clone()))?;
        self.wait_visible(driver, selector, checkbox).await?;

        let enable = self.config.enable_poll;
        let action_timeout = self.config.action_timeout;
        enable
            .run("checkbox enabled", move |_| {
                self.bounded(
                    "checkbox enabled",
                    enable.delay + action_timeout,
                    driver.wait_enabled(checkbox, enable.delay),
                )
            })
            .await?;

        if self
            .act("read checkbox", driver.is_checked(checkbox))
            .await?
        {
            tracing::debug!(identifier, "Checkbox already checked");
            return Ok(());
        }

        self.act("click checkbox", driver.click(checkbox, false))
            .await?;
        if self.confirm_checked(driver, checkbox).await? {
            return Ok(());
        }

        tracing::debug!(identifier, "Click did not register, forcing");
        self.act("force click checkbox", driver.click(checkbox, true))
            .await?;
        if self.confirm_checked(driver, checkbox).await? {
            Ok(())
        } else {
            Err(SelectError::NotChecked(identifier.to_string()))
        }
    }

    async fn confirm_checked(
        &self,
        driver: &dyn PageDriver,
        checkbox: ElementHandle,
    ) -> Result<bool, DriverError> {
        let confirmed = self
            .config
            .check_confirm
            .poll("checkbox checked", move || async move {
                let checked = self
                    .act("read checkbox", driver.is_checked(checkbox))
                    .await?;
                Ok(checked.then_some(()))
            })
            .await;
        match confirmed {
            Ok(()) => Ok(true),
            Err(e) if e.is_timeout() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Apply `mode` to every selected row. The search is cleared afterwards
    /// whatever the result.
    ///
    /// Succeeds only once the page reports no checked rows within the
    /// `bulk_settle` policy; otherwise [`BulkApplyError::NotSettled`].
    pub async fn bulk_apply(
        &self,
        driver: &dyn PageDriver,
        mode: DutyMode,
    ) -> Result<(), BulkApplyError> {
        let result = self.trigger_bulk_action(driver, mode).await;
        self.clear_search(driver).await;
        result
    }

    async fn trigger_bulk_action(
        &self,
        driver: &dyn PageDriver,
        mode: DutyMode,
    ) -> Result<(), BulkApplyError> {
        let selectors = &self.portal.selectors;
        let selected = self
            .act("count selected", driver.count_checked(Scope::Page))
            .await?;
        if selected == 0 {
            return Err(BulkApplyError::NothingSelected);
        }
        tracing::debug!(mode = %mode, selected, "Triggering bulk action");

        let menu = self
            .wait_for(
                driver,
                &selectors.bulk_actions,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("open bulk actions", driver.click(menu, false))
            .await?;

        let action = self
            .wait_for(
                driver,
                mode.action_selector(selectors),
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("click bulk action", driver.click(action, false))
            .await?;

        let settle = self.config.bulk_settle;
        settle
            .poll("bulk action confirmation", move || async move {
                let remaining = self
                    .act("count selected", driver.count_checked(Scope::Page))
                    .await?;
                Ok((remaining == 0).then_some(()))
            })
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BulkApplyError::NotSettled(settle.budget())
                } else {
                    BulkApplyError::Control(e)
                }
            })
    }

    pub(super) async fn logout(&self, driver: &dyn PageDriver) -> Result<(), DriverError> {
        let selectors = &self.portal.selectors;
        let menu = self
            .wait_for(
                driver,
                &selectors.user_menu,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("open user menu", driver.click(menu, false)).await?;

        let logout = self
            .wait_for(
                driver,
                &selectors.logout,
                Scope::Page,
                self.config.control_wait,
            )
            .await?;
        self.act("click logout", driver.click(logout, false))
            .await?;
        self.await_navigation(driver).await
    }
}
