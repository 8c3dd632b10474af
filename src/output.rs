//! Append-only CSV outputs.
//!
//! A file is created with its header on first use. Afterwards the header found on
//! disk decides the column order, so reruns keep writing the same layout.
//!
//! A run that dies mid-write can leave a short last row without a newline. Readers
//! skip such rows, and the next appender starts on a fresh line.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::extract::Fields;
use crate::selectors::SelectorMap;
use crate::{error_time, Result};

pub const RESULTS_HEADER: [&str; 4] = ["area", "title", "item_url", "results_page_url"];

/// A row that can be written under any header: unknown columns are written empty.
pub trait CsvRow {
    fn column(&self, name: &str) -> Option<&str>;
}

/// One result card found on a search results page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub item_url: String,
    #[serde(default)]
    pub results_page_url: String,
}

impl CsvRow for ResultRow {
    fn column(&self, name: &str) -> Option<&str> {
        match name {
            "area" => Some(&self.area),
            "title" => Some(&self.title),
            "item_url" => Some(&self.item_url),
            "results_page_url" => Some(&self.results_page_url),
            _ => None,
        }
    }
}

/// The fields extracted from one item's detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRow {
    pub area: String,
    pub item_url: String,
    pub fields: Fields,
}

impl CsvRow for DetailRow {
    fn column(&self, name: &str) -> Option<&str> {
        match name {
            "area" => Some(&self.area),
            "item_url" => Some(&self.item_url),
            _ => self.fields.get(name),
        }
    }
}

/// `area, item_url`, then the selector fields in definition order.
pub fn details_header(selectors: &SelectorMap) -> Vec<String> {
    ["area", "item_url"]
        .into_iter()
        .chain(selectors.fields())
        .map(str::to_string)
        .collect()
}

pub struct CsvAppender {
    path: PathBuf,
    header: Vec<String>,
    writer: csv::Writer<File>,
}

impl CsvAppender {
    /// Opens `path` for appending, creating it (and its directory) with `header` if absent.
    /// An existing file keeps its own header.
    pub fn open<S: AsRef<str>>(path: impl AsRef<Path>, header: &[S]) -> Result<Self> {
        let path = path.as_ref();
        let header = ensure_csv(path, header)?;
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        terminate_last_line(&mut file)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        Ok(CsvAppender {
            path: path.to_path_buf(),
            header,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Reports `columns` that the header on disk has no place for. They will not be written.
    pub fn unknown_columns<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        columns
            .into_iter()
            .filter(|col| !self.header.iter().any(|h| h == col))
            .collect()
    }

    /// Writes one row and flushes it straight to disk.
    pub fn append(&mut self, row: &impl CsvRow) -> Result<()> {
        let record = self
            .header
            .iter()
            .map(|col| row.column(col).unwrap_or_default());
        self.writer.write_record(record)?;
        self.writer.flush()?;
        Ok(())
    }

    /// The set of values already present in `column`, used to skip finished work.
    pub fn done_set(&self, column: &str) -> Result<HashSet<String>> {
        read_done_set(&self.path, column)
    }
}

/// Creates the file with `header` if needed and returns the header it actually has.
pub fn ensure_csv<S: AsRef<str>>(path: &Path, header: &[S]) -> Result<Vec<String>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let wanted: Vec<String> = header.iter().map(|h| h.as_ref().to_string()).collect();
    let is_empty = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if is_empty {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&wanted)?;
        writer.flush()?;
        return Ok(wanted);
    }

    let mut reader = csv_reader(path)?;
    let existing: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if existing != wanted {
        error_time!(
            "{} has header [{}], keeping it instead of [{}]",
            path.display(),
            existing.join(", "),
            wanted.join(", ")
        );
    }
    Ok(existing)
}

/// Appends a newline when the file does not end with one.
fn terminate_last_line(file: &mut File) -> Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn csv_reader(path: &Path) -> Result<csv::Reader<File>> {
    Ok(csv::ReaderBuilder::new().flexible(true).from_path(path)?)
}

/// Rows with fewer columns than the header were cut off while being written.
fn complete_records(
    path: &Path,
    reader: &mut csv::Reader<File>,
    header_len: usize,
) -> Result<Vec<csv::StringRecord>> {
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < header_len {
            error_time!(
                "{}: skipping incomplete row on line {}",
                path.display(),
                record.position().map_or(0, |pos| pos.line())
            );
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

/// Values of `column` in an existing CSV. A missing file is an empty set.
pub fn read_done_set(path: &Path, column: &str) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }

    let mut reader = csv_reader(path)?;
    let header = reader.headers()?.clone();
    let Some(idx) = header.iter().position(|h| h == column) else {
        return Ok(HashSet::new());
    };

    Ok(complete_records(path, &mut reader, header.len())?
        .iter()
        .filter_map(|record| record.get(idx).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .collect())
}

/// Reads the rows of a results CSV in file order.
pub fn read_results(path: &Path) -> Result<Vec<ResultRow>> {
    let mut reader = csv_reader(path)?;
    let header = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in complete_records(path, &mut reader, header.len())? {
        rows.push(record.deserialize(Some(&header))?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::StaticPage;
    use crate::extract::extract_fields;
    use crate::selectors::parse_field_selectors;

    fn result(area: &str, url: &str) -> ResultRow {
        ResultRow {
            area: area.into(),
            title: format!("Title {url}"),
            item_url: url.into(),
            results_page_url: "https://x/list/1".into(),
        }
    }

    #[test]
    fn creates_directory_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/results.csv");
        let appender = CsvAppender::open(&path, &RESULTS_HEADER).unwrap();
        assert_eq!(appender.header(), RESULTS_HEADER);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "area,title,item_url,results_page_url\n"
        );
    }

    #[test]
    fn appended_rows_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut appender = CsvAppender::open(&path, &RESULTS_HEADER).unwrap();
        appender.append(&result("London", "https://x/1")).unwrap();
        appender.append(&result("London", "https://x/2, with comma")).unwrap();

        let rows = read_results(&path).unwrap();
        assert_eq!(rows, [result("London", "https://x/1"), result("London", "https://x/2, with comma")]);
    }

    #[test]
    fn reopening_keeps_existing_rows_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        {
            let mut appender = CsvAppender::open(&path, &RESULTS_HEADER).unwrap();
            appender.append(&result("London", "https://x/1")).unwrap();
        }
        let mut appender = CsvAppender::open(&path, &RESULTS_HEADER).unwrap();
        appender.append(&result("Birmingham", "https://x/2")).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(read_results(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn detail_row_round_trip_keeps_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.csv");
        let selectors = parse_field_selectors("name: h1\nphone: .phone\nemail: a.mail@href\n");
        let page = StaticPage::parse("https://x/1", "<h1>Acorns</h1>");
        let fields = extract_fields(&page, &selectors).await.unwrap();

        let mut appender = CsvAppender::open(&path, &details_header(&selectors)).unwrap();
        appender
            .append(&DetailRow {
                area: "London".into(),
                item_url: "https://x/1".into(),
                fields,
            })
            .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, ["area", "item_url", "name", "phone", "email"]);
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.len(), 5);
        assert_eq!(&record[2], "Acorns");
        assert_eq!(&record[3], "");
        assert_eq!(&record[4], "");
    }

    #[test]
    fn existing_header_is_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.csv");
        fs::write(&path, "area,item_url,phone,name\nLondon,https://x/1,123,Old\n").unwrap();

        let selectors = parse_field_selectors("name: h1\nphone: .phone\nwebsite: a@href\n");
        let appender = CsvAppender::open(&path, &details_header(&selectors)).unwrap();
        assert_eq!(appender.header(), ["area", "item_url", "phone", "name"]);
        assert_eq!(appender.unknown_columns(selectors.fields()), ["website"]);
        assert_eq!(
            appender.done_set("item_url").unwrap(),
            HashSet::from(["https://x/1".to_string()])
        );
    }

    #[test]
    fn done_set_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_done_set(&dir.path().join("none.csv"), "item_url").unwrap().is_empty());
    }

    const TORN: &str = "area,item_url,name\nLondon,https://x/z,Z\nLondon,https://x/y";

    #[test]
    fn cut_off_last_row_is_left_out_of_the_done_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.csv");
        fs::write(&path, TORN).unwrap();
        assert_eq!(
            read_done_set(&path, "item_url").unwrap(),
            HashSet::from(["https://x/z".to_string()])
        );
    }

    #[tokio::test]
    async fn append_after_cut_off_row_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.csv");
        fs::write(&path, TORN).unwrap();

        let selectors = parse_field_selectors("name: h1\n");
        let mut appender = CsvAppender::open(&path, &details_header(&selectors)).unwrap();
        let page = StaticPage::parse("https://x/y", "<h1>Y</h1>");
        let fields = extract_fields(&page, &selectors).await.unwrap();
        appender
            .append(&DetailRow {
                area: "London".into(),
                item_url: "https://x/y".into(),
                fields,
            })
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{TORN}\nLondon,https://x/y,Y\n"));
        assert_eq!(appender.done_set("item_url").unwrap().len(), 2);
    }

    #[test]
    fn results_reader_skips_cut_off_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(
            &path,
            "area,title,item_url,results_page_url\nLondon,A,https://x/1,https://x/list/1\nLondon,B,https://x/",
        )
        .unwrap();
        let rows = read_results(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_url, "https://x/1");
    }
}
