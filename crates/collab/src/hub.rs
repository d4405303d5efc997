//! Registry of open workbooks.
//!
//! The hub is the in-process entry point: every call names a workbook by id
//! and is routed to that workbook's actor. Workbooks are independent; a slow
//! or poisoned one never blocks another.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use cogrid_config::CollabSettings;
use cogrid_engine::{CellView, SessionId, ValueChangeSet};

use crate::bridge::{Connected, Reconnected};
use crate::error::{CollabError, HubError};
use crate::handle::WorkbookHandle;

pub struct Hub {
    settings: CollabSettings,
    workbooks: RwLock<FxHashMap<String, Arc<WorkbookHandle>>>,
}

impl Hub {
    pub fn new(settings: CollabSettings) -> Self {
        Self {
            settings,
            workbooks: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn settings(&self) -> &CollabSettings {
        &self.settings
    }

    /// Open a new, empty workbook.
    pub fn open_workbook(&self, id: &str) -> Result<Arc<WorkbookHandle>, CollabError> {
        let mut workbooks = self.workbooks.write();
        if workbooks.contains_key(id) {
            return Err(HubError::DuplicateWorkbook(id.to_string()).into());
        }
        let handle = Arc::new(WorkbookHandle::spawn(id, &self.settings)?);
        workbooks.insert(id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// The workbook, opening it first if needed.
    pub fn open_or_get(&self, id: &str) -> Result<Arc<WorkbookHandle>, CollabError> {
        if let Some(handle) = self.workbooks.read().get(id) {
            return Ok(Arc::clone(handle));
        }
        match self.open_workbook(id) {
            Err(CollabError::Hub(HubError::DuplicateWorkbook(_))) => self.workbook(id),
            other => other,
        }
    }

    pub fn workbook(&self, id: &str) -> Result<Arc<WorkbookHandle>, CollabError> {
        self.workbooks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::UnknownWorkbook(id.to_string()).into())
    }

    /// Ids of open workbooks, sorted.
    pub fn workbook_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workbooks.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Shut a workbook down and forget it.
    pub fn close_workbook(&self, id: &str) -> Result<(), CollabError> {
        let handle = self
            .workbooks
            .write()
            .remove(id)
            .ok_or_else(|| HubError::UnknownWorkbook(id.to_string()))?;
        handle.shutdown();
        Ok(())
    }

    /// Join a workbook as a new session.
    pub fn connect(&self, workbook_id: &str) -> Result<Connected, CollabError> {
        self.workbook(workbook_id)?.connect()
    }

    /// Apply one edit on behalf of `session`.
    pub fn submit_operation(
        &self,
        workbook_id: &str,
        address: &str,
        raw: &str,
        base_version: Option<u64>,
        session: SessionId,
    ) -> Result<ValueChangeSet, CollabError> {
        self.workbook(workbook_id)?.submit(session, address, raw, base_version)
    }

    /// Bring a session back up to date and resubscribe it.
    pub fn resync(
        &self,
        workbook_id: &str,
        session: SessionId,
        last_known_version: Option<u64>,
    ) -> Result<Reconnected, CollabError> {
        self.workbook(workbook_id)?.reconnect(session, last_known_version)
    }

    pub fn get_cell(&self, workbook_id: &str, address: &str) -> Result<CellView, CollabError> {
        self.workbook(workbook_id)?.get_cell(address)
    }

    pub fn get_worksheet(&self, workbook_id: &str, sheet: &str) -> Result<Vec<CellView>, CollabError> {
        self.workbook(workbook_id)?.get_worksheet(sheet)
    }

    /// Shut every workbook down.
    pub fn shutdown(&self) {
        let handles: Vec<Arc<WorkbookHandle>> = self.workbooks.write().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.shutdown();
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
