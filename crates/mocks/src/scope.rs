use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::router::{MockRouter, MockService};
use crate::routes::{ConfigError, RouteManager, RouteTable};

/// Set while a scope is live. A single interception hook may exist per
/// process: beginning a second scope while one is active is rejected.
static SCOPE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Scope-exit verification failures. The two variants are mutually
/// exclusive per verification pass: unmatched requests win over
/// never-called routes when both exist.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("requests were issued for routes that were never registered:\n\t{}", .routes.join("\n\t"))]
    RouteNotFound { routes: Vec<String> },

    #[error("these routes were registered but never called:\n\t{}", .routes.join("\n\t"))]
    RouteNotCalled { routes: Vec<String> },
}

/// MockScope owns one interception window: beginning it claims the
/// process-wide hook and allocates a fresh route table; ending it releases
/// the hook and checks that every expectation was consumed and every
/// request matched.
///
/// [`MockScope::verify`] is the intended exit. Dropping the scope without
/// verifying still releases the hook (so an unwinding test does not wedge
/// the process) but surfaces nothing; leftovers are debug-logged only.
pub struct MockScope {
    table: Arc<Mutex<RouteTable>>,
    router: MockRouter,
    released: bool,
}

impl MockScope {
    /// Claims the process-wide interception hook and starts a scope with an
    /// empty table.
    pub fn begin() -> Result<Self, ConfigError> {
        if SCOPE_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::ScopeAlreadyActive);
        }
        wren_logs::debug!("mock scope installed");

        let table = Arc::new(Mutex::new(RouteTable::default()));
        let router = MockRouter::new(table.clone());
        Ok(Self {
            table,
            router,
            released: false,
        })
    }

    /// The registration handle for this scope.
    pub fn routes(&self) -> RouteManager {
        RouteManager::new(self.table.clone())
    }

    /// The interception seam for this scope, to be injected into the code
    /// under test in place of its real transport.
    pub fn service(&self) -> MockService {
        MockService::new(self.router.clone())
    }

    /// Ends the scope: releases the hook, then fails if any request went
    /// unmatched or any expectation is still pending. Unmatched requests
    /// take priority and suppress the pending-routes report.
    pub fn verify(mut self) -> Result<(), VerifyError> {
        self.release();
        let table = self.table.lock().expect("lock poisoned");
        verify_table(&table)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            SCOPE_ACTIVE.store(false, Ordering::SeqCst);
            wren_logs::debug!("mock scope released");
        }
    }
}

impl Drop for MockScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.release();
        if let Ok(table) = self.table.lock() {
            for line in table.unmatched() {
                wren_logs::debug!("scope dropped with an unmatched request: {}", line);
            }
            for (key, count) in table.pending() {
                wren_logs::debug!("scope dropped with {} pending expectation(s) for {}", count, key);
            }
        }
    }
}

fn verify_table(table: &RouteTable) -> Result<(), VerifyError> {
    let unmatched = table.unmatched();
    if !unmatched.is_empty() {
        return Err(VerifyError::RouteNotFound {
            routes: unmatched.to_vec(),
        });
    }

    let pending: Vec<String> = table
        .pending()
        .into_iter()
        .map(|(key, count)| format!("{key} ({count} pending)"))
        .collect();
    if !pending.is_empty() {
        return Err(VerifyError::RouteNotCalled { routes: pending });
    }

    Ok(())
}

/// Runs `f` inside a fresh mock scope and verifies on the way out.
///
/// The closure receives the scope's registration handle and its
/// interception service. The hook is released unconditionally once the
/// closure's future settles; verification always runs, but an error
/// returned by the closure takes precedence over verification failures
/// (which are then only debug-logged).
pub async fn with_mock_routes<T, F, Fut>(f: F) -> anyhow::Result<T>
where
    F: FnOnce(RouteManager, MockService) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let scope = MockScope::begin()?;
    match f(scope.routes(), scope.service()).await {
        Ok(value) => {
            scope.verify()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(verify_err) = scope.verify() {
                wren_logs::debug!("verification also failed: {}", verify_err);
            }
            Err(err)
        }
    }
}
