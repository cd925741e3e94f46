use crate::error::RemoteError;
use crate::google::{endpoint, GoogleClient};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, warn};

/// One output line: column name -> cell value, in column order.
pub type Row = IndexMap<String, Value>;

pub const ANNOTATION_COLUMN: &str = "Annotation";
pub const REVIEW_COLUMN: &str = "Your Review";
pub const REVIEWER_COLUMNS: [&str; 2] = [ANNOTATION_COLUMN, REVIEW_COLUMN];

/// Accepted reviewer tokens with their highlight color (red, green, blue).
pub const REVIEW_TOKENS: [(&str, [f64; 3]); 3] = [
    ("SAFE", [0.85, 0.95, 0.85]),
    ("HIGH", [1.0, 0.85, 0.85]),
    ("LOW", [0.85, 0.93, 1.0]),
];

pub const DEFAULT_SHEET_ROWS: u32 = 100;
pub const DEFAULT_SHEET_COLS: u32 = 26;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// The spreadsheet operations the writer needs.
pub trait SheetsApi {
    /// Grid id of the tab titled `title`, if it exists.
    fn worksheet_id(&self, spreadsheet_id: &str, title: &str) -> Result<Option<i64>, RemoteError>;
    fn add_worksheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
        rows: u32,
        cols: u32,
    ) -> Result<i64, RemoteError>;
    /// Writes a rectangular block of user-entered values to an A1 range.
    fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<(), RemoteError>;
    fn batch_update(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub title: String,
    pub sheet_id: i64,
}

pub fn ensure_worksheet<S: SheetsApi + ?Sized>(
    api: &S,
    spreadsheet_id: &str,
    title: &str,
    rows: u32,
    cols: u32,
) -> Result<Worksheet> {
    let existing = api
        .worksheet_id(spreadsheet_id, title)
        .with_context(|| format!("failed to look up worksheet {title}"))?;
    let sheet_id = match existing {
        Some(id) => id,
        None => {
            info!(worksheet = %title, rows, cols, "creating worksheet");
            api.add_worksheet(spreadsheet_id, title, rows, cols)
                .with_context(|| format!("failed to create worksheet {title}"))?
        }
    };
    Ok(Worksheet {
        title: title.to_string(),
        sheet_id,
    })
}

/// Writes headers to row 1 and `rows` from `start_row` (1-based), then adds
/// dropdowns and highlighting to the reviewer columns. Returns the number of
/// data rows written.
pub fn write_rows<S: SheetsApi + ?Sized>(
    api: &S,
    spreadsheet_id: &str,
    title: &str,
    rows: &[Row],
    start_row: u32,
) -> Result<usize> {
    let Some(first) = rows.first() else {
        warn!(worksheet = %title, "no rows to write");
        return Ok(0);
    };
    let headers: Vec<String> = first.keys().cloned().collect();
    let row_count = rows.len() as u32;
    let col_count = headers.len() as u32;

    let worksheet = ensure_worksheet(
        api,
        spreadsheet_id,
        title,
        DEFAULT_SHEET_ROWS.max(start_row - 1 + row_count),
        DEFAULT_SHEET_COLS.max(col_count),
    )?;

    let header_range = a1_range(title, 1, 1, 1, col_count);
    let header_values: Vec<Vec<Value>> = vec![headers.iter().map(|h| Value::String(h.clone())).collect()];
    api.write_range(spreadsheet_id, &header_range, header_values)
        .context("failed to write header row")?;

    let last_row = start_row + row_count - 1;
    let data_range = a1_range(title, start_row, 1, last_row, col_count);
    let values: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|key| cell_value(row.get(key)))
                .collect()
        })
        .collect();
    api.write_range(spreadsheet_id, &data_range, values)
        .context("failed to write rows")?;
    info!(worksheet = %worksheet.title, range = %data_range, rows = row_count, "rows written");

    for column in REVIEWER_COLUMNS {
        let Some(index) = headers.iter().position(|h| h == column) else {
            continue;
        };
        let range = GridRange {
            sheet_id: worksheet.sheet_id,
            start_row_index: start_row - 1,
            end_row_index: last_row,
            start_column_index: index as u32,
            end_column_index: index as u32 + 1,
        };
        api.batch_update(spreadsheet_id, reviewer_rules(&range))
            .with_context(|| format!("failed to add review rules to {column}"))?;
    }

    Ok(rows.len())
}

fn cell_value(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::String(String::new()),
        Some(value) => value.clone(),
    }
}

/// Zero-based, end-exclusive grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRange {
    pub sheet_id: i64,
    pub start_row_index: u32,
    pub end_row_index: u32,
    pub start_column_index: u32,
    pub end_column_index: u32,
}

impl GridRange {
    fn to_json(self) -> Value {
        json!({
            "sheetId": self.sheet_id,
            "startRowIndex": self.start_row_index,
            "endRowIndex": self.end_row_index,
            "startColumnIndex": self.start_column_index,
            "endColumnIndex": self.end_column_index,
        })
    }
}

/// One dropdown rule plus one highlight rule per token, all over `range`.
pub fn reviewer_rules(range: &GridRange) -> Vec<Value> {
    let options: Vec<Value> = REVIEW_TOKENS
        .iter()
        .map(|(token, _)| json!({"userEnteredValue": token}))
        .collect();

    let mut requests = vec![json!({
        "setDataValidation": {
            "range": range.to_json(),
            "rule": {
                "condition": {"type": "ONE_OF_LIST", "values": options},
                "showCustomUi": true,
            }
        }
    })];

    for (token, [red, green, blue]) in REVIEW_TOKENS {
        requests.push(json!({
            "addConditionalFormatRule": {
                "rule": {
                    "ranges": [range.to_json()],
                    "booleanRule": {
                        "condition": {
                            "type": "TEXT_EQ",
                            "values": [{"userEnteredValue": token}],
                        },
                        "format": {
                            "backgroundColor": {"red": red, "green": green, "blue": blue}
                        }
                    }
                },
                "index": 0
            }
        }));
    }
    requests
}

/// 1-based column number to its A1 letters (`1` -> `A`, `27` -> `AA`).
pub fn column_letters(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A1 range over 1-based, inclusive rows and columns.
pub fn a1_range(title: &str, first_row: u32, first_col: u32, last_row: u32, last_col: u32) -> String {
    format!(
        "'{}'!{}{}:{}{}",
        title.replace('\'', "''"),
        column_letters(first_col),
        first_row,
        column_letters(last_col),
        last_row
    )
}

/// Sheets v4 REST client.
pub struct GoogleSheets {
    client: GoogleClient,
}

impl GoogleSheets {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }

    fn batch_update_raw(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<Value, RemoteError> {
        let method = format!("{spreadsheet_id}:batchUpdate");
        let url = endpoint(SHEETS_API, &[method.as_str()])?;
        let request = self
            .client
            .request(Method::POST, url)
            .json(&json!({"requests": requests}));
        self.client.execute(request)
    }
}

impl SheetsApi for GoogleSheets {
    fn worksheet_id(&self, spreadsheet_id: &str, title: &str) -> Result<Option<i64>, RemoteError> {
        let url = endpoint(SHEETS_API, &[spreadsheet_id])?;
        let request = self
            .client
            .request(Method::GET, url)
            .query(&[("fields", "sheets.properties(sheetId,title)")]);
        let body = self.client.execute(request)?;
        Ok(body
            .get("sheets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|sheet| sheet.get("properties"))
            .find(|props| props.get("title").and_then(Value::as_str) == Some(title))
            .and_then(|props| props.get("sheetId"))
            .and_then(Value::as_i64))
    }

    fn add_worksheet(
        &self,
        spreadsheet_id: &str,
        title: &str,
        rows: u32,
        cols: u32,
    ) -> Result<i64, RemoteError> {
        let body = self.batch_update_raw(
            spreadsheet_id,
            vec![json!({
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": {"rowCount": rows, "columnCount": cols}
                    }
                }
            })],
        )?;
        body.pointer("/replies/0/addSheet/properties/sheetId")
            .and_then(Value::as_i64)
            .ok_or_else(|| RemoteError::MissingField {
                url: format!("{SHEETS_API}/{spreadsheet_id}:batchUpdate"),
                field: "sheetId",
            })
    }

    fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<Value>>,
    ) -> Result<(), RemoteError> {
        let url = endpoint(SHEETS_API, &[spreadsheet_id, "values", range])?;
        let request = self
            .client
            .request(Method::PUT, url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({"range": range, "majorDimension": "ROWS", "values": values}));
        self.client.execute(request).map(|_| ())
    }

    fn batch_update(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<(), RemoteError> {
        self.batch_update_raw(spreadsheet_id, requests).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSheets;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn column_letters_cover_multi_letter_columns() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(8), "H");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(52), "AZ");
        assert_eq!(column_letters(703), "AAA");
    }

    #[test]
    fn a1_range_quotes_titles() {
        assert_eq!(a1_range("data/run1", 2, 1, 4, 8), "'data/run1'!A2:H4");
        assert_eq!(a1_range("Bob's", 1, 1, 1, 2), "'Bob''s'!A1:B1");
    }

    #[test]
    fn writes_headers_and_rows_in_two_batches() {
        let sheets = FakeSheets::default();
        let rows = vec![
            row(&[("action_id", json!(0)), ("url", json!("https://a")), ("Screenshot View", Value::Null)]),
            row(&[("action_id", json!(1)), ("url", json!("https://b")), ("Screenshot View", json!("https://l"))]),
        ];

        let written = write_rows(&sheets, "sheet", "run1", &rows, 2).unwrap();
        assert_eq!(written, 2);
        assert_eq!(sheets.added(), vec![("run1".to_string(), 100, 26)]);

        let writes = sheets.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, "'run1'!A1:C1");
        assert_eq!(writes[0].1, vec![vec![json!("action_id"), json!("url"), json!("Screenshot View")]]);
        assert_eq!(writes[1].0, "'run1'!A2:C3");
        assert_eq!(
            writes[1].1,
            vec![
                vec![json!(0), json!("https://a"), json!("")],
                vec![json!(1), json!("https://b"), json!("https://l")],
            ]
        );
        assert!(sheets.batches().is_empty());
    }

    #[test]
    fn annotation_column_gets_one_validation_and_three_formats() {
        let sheets = FakeSheets::with_worksheet("run1", 42);
        let rows = vec![
            row(&[("action_id", json!(0)), ("Annotation", json!("SAFE"))]),
            row(&[("action_id", json!(1)), ("Annotation", json!("HIGH"))]),
            row(&[("action_id", json!(2)), ("Annotation", json!("LOW"))]),
        ];

        write_rows(&sheets, "sheet", "run1", &rows, 2).unwrap();
        assert!(sheets.added().is_empty());

        let batches = sheets.batches();
        assert_eq!(batches.len(), 1);
        let requests = &batches[0];
        assert_eq!(requests.len(), 4);

        let expected = json!({
            "sheetId": 42,
            "startRowIndex": 1,
            "endRowIndex": 4,
            "startColumnIndex": 1,
            "endColumnIndex": 2,
        });
        let validations: Vec<&Value> = requests
            .iter()
            .filter_map(|r| r.get("setDataValidation"))
            .collect();
        assert_eq!(validations.len(), 1);
        assert_eq!(validations[0]["range"], expected);
        assert_eq!(validations[0]["rule"]["condition"]["values"].as_array().unwrap().len(), 3);

        let formats: Vec<&Value> = requests
            .iter()
            .filter_map(|r| r.get("addConditionalFormatRule"))
            .collect();
        assert_eq!(formats.len(), 3);
        let tokens: Vec<&str> = formats
            .iter()
            .map(|f| {
                assert_eq!(f["rule"]["ranges"], json!([expected.clone()]));
                f["rule"]["booleanRule"]["condition"]["values"][0]["userEnteredValue"]
                    .as_str()
                    .unwrap()
            })
            .collect();
        assert_eq!(tokens, vec!["SAFE", "HIGH", "LOW"]);
    }

    #[test]
    fn both_reviewer_columns_get_rules() {
        let sheets = FakeSheets::default();
        let rows = vec![row(&[
            ("Annotation", json!("SAFE")),
            ("Your Review", json!("SAFE")),
        ])];
        write_rows(&sheets, "sheet", "run1", &rows, 2).unwrap();

        let batches = sheets.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0]["setDataValidation"]["range"]["startColumnIndex"], json!(1));
    }

    #[test]
    fn worksheet_grows_to_fit_large_batches() {
        let sheets = FakeSheets::default();
        let rows: Vec<Row> = (0..150).map(|i| row(&[("action_id", json!(i))])).collect();
        write_rows(&sheets, "sheet", "big", &rows, 2).unwrap();
        assert_eq!(sheets.added(), vec![("big".to_string(), 151, 26)]);
        assert_eq!(sheets.writes()[1].0, "'big'!A2:A151");
    }

    #[test]
    fn empty_rows_write_nothing() {
        let sheets = FakeSheets::default();
        assert_eq!(write_rows(&sheets, "sheet", "run1", &[], 2).unwrap(), 0);
        assert!(sheets.writes().is_empty());
        assert!(sheets.added().is_empty());
    }
}
