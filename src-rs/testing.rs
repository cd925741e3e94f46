//! In-memory stand-ins for the Drive and Sheets services.

use crate::drive::DriveApi;
use crate::error::RemoteError;
use crate::sheets::SheetsApi;
use serde_json::Value;
use std::cell::{Cell, RefCell};

fn refused(url: &str) -> RemoteError {
    RemoteError::Status {
        url: url.to_string(),
        status: 500,
        body: "fake failure".to_string(),
    }
}

#[derive(Debug, Clone)]
struct FakeFolder {
    id: String,
    name: String,
    parent: String,
}

#[derive(Default)]
pub struct FakeDrive {
    folders: RefCell<Vec<FakeFolder>>,
    uploads: RefCell<Vec<(String, String)>>,
    shared: RefCell<Vec<String>>,
    find_calls: Cell<usize>,
    create_calls: Cell<usize>,
    next_id: Cell<usize>,
    fail_uploads: bool,
    fail_shares: bool,
}

impl FakeDrive {
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn failing_shares() -> Self {
        Self {
            fail_shares: true,
            ..Self::default()
        }
    }

    fn allocate(&self, prefix: &str) -> String {
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        format!("{prefix}-{n}")
    }

    pub fn add_folder(&self, name: &str, parent: &str) -> String {
        let id = self.allocate("folder");
        self.folders.borrow_mut().push(FakeFolder {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.to_string(),
        });
        id
    }

    pub fn folder_parent(&self, id: &str) -> Option<String> {
        self.folders
            .borrow()
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.parent.clone())
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.get()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.get()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.borrow().clone()
    }

    pub fn shared_files(&self) -> Vec<String> {
        self.shared.borrow().clone()
    }
}

impl DriveApi for FakeDrive {
    fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>, RemoteError> {
        self.find_calls.set(self.find_calls.get() + 1);
        Ok(self
            .folders
            .borrow()
            .iter()
            .find(|f| f.name == name && f.parent == parent_id)
            .map(|f| f.id.clone()))
    }

    fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, RemoteError> {
        self.create_calls.set(self.create_calls.get() + 1);
        Ok(self.add_folder(name, parent_id))
    }

    fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        _bytes: Vec<u8>,
    ) -> Result<String, RemoteError> {
        if self.fail_uploads {
            return Err(refused("fake://upload"));
        }
        self.uploads
            .borrow_mut()
            .push((name.to_string(), parent_id.to_string()));
        Ok(self.allocate("file"))
    }

    fn share_publicly(&self, file_id: &str) -> Result<(), RemoteError> {
        if self.fail_shares {
            return Err(refused("fake://permissions"));
        }
        self.shared.borrow_mut().push(file_id.to_string());
        Ok(())
    }

    fn web_view_link(&self, file_id: &str) -> Result<Option<String>, RemoteError> {
        Ok(Some(format!(
            "https://drive.google.com/file/d/{file_id}/view?usp=drivesdk"
        )))
    }
}

#[derive(Default)]
pub struct FakeSheets {
    worksheets: RefCell<Vec<(String, i64)>>,
    added: RefCell<Vec<(String, u32, u32)>>,
    writes: RefCell<Vec<(String, Vec<Vec<Value>>)>>,
    batches: RefCell<Vec<Vec<Value>>>,
}

impl FakeSheets {
    pub fn with_worksheet(title: &str, sheet_id: i64) -> Self {
        let sheets = Self::default();
        sheets
            .worksheets
            .borrow_mut()
            .push((title.to_string(), sheet_id));
        sheets
    }

    pub fn added(&self) -> Vec<(String, u32, u32)> {
        self.added.borrow().clone()
    }

    pub fn writes(&self) -> Vec<(String, Vec<Vec<Value>>)> {
        self.writes.borrow().clone()
    }

    pub fn batches(&self) -> Vec<Vec<Value>> {
        self.batches.borrow().clone()
    }
}

impl SheetsApi for FakeSheets {
    fn worksheet_id(&self, _spreadsheet_id: &str, title: &str) -> Result<Option<i64>, RemoteError> {
        Ok(self
            .worksheets
            .borrow()
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, id)| *id))
    }

    fn add_worksheet(
        &self,
        _spreadsheet_id: &str,
        title: &str,
        rows: u32,
        cols: u32,
    ) -> Result<i64, RemoteError> {
        let id = 1000 + self.worksheets.borrow().len() as i64;
        self.worksheets.borrow_mut().push((title.to_string(), id));
        self.added.borrow_mut().push((title.to_string(), rows, cols));
        Ok(id)
    }

    fn write_range(
        &self,
        _spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<(), RemoteError> {
        self.writes.borrow_mut().push((range.to_string(), values));
        Ok(())
    }

    fn batch_update(&self, _spreadsheet_id: &str, requests: Vec<Value>) -> Result<(), RemoteError> {
        self.batches.borrow_mut().push(requests);
        Ok(())
    }
}
