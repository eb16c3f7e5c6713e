use crate::common::Result;
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub time: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded,
    AlreadyPresent,
}

/// Names already written for `date`, mirrored from that day's file.
#[derive(Default)]
struct LedgerDay {
    date: Option<NaiveDate>,
    names: HashSet<String>,
}

/// One CSV file per calendar day, rows of `name,HH:MM:SS`, no header.
///
/// `mark` holds a single lock across the presence check and the append, so
/// a name is written at most once per day no matter how many threads race.
pub struct AttendanceLedger {
    dir: PathBuf,
    day: Mutex<LedgerDay>,
}

impl AttendanceLedger {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            day: Mutex::new(LedgerDay::default()),
        })
    }

    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("attendance_{}.csv", date.format("%Y-%m-%d")))
    }

    pub fn mark(&self, name: &str) -> Result<MarkOutcome> {
        self.mark_at(name, Local::now().naive_local())
    }

    pub fn mark_at(&self, name: &str, now: NaiveDateTime) -> Result<MarkOutcome> {
        let date = now.date();
        let mut day = self.lock_day();

        if day.date != Some(date) {
            day.names = self.read_names(date)?;
            day.date = Some(date);
        }

        if day.names.contains(name) {
            return Ok(MarkOutcome::AlreadyPresent);
        }

        let row = format!("{},{}\n", format_field(name), now.format("%H:%M:%S"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(date))?;
        file.write_all(row.as_bytes())?;
        file.sync_data()?;

        day.names.insert(name.to_string());
        Ok(MarkOutcome::Recorded)
    }

    /// Re-reads today's file into the in-memory set, picking up rows
    /// written by other processes.
    pub fn reconcile(&self) -> Result<()> {
        let date = Local::now().date_naive();
        let mut day = self.lock_day();
        day.names = self.read_names(date)?;
        day.date = Some(date);
        Ok(())
    }

    pub fn list_today(&self) -> Result<Vec<AttendanceRecord>> {
        self.list_for(Local::now().date_naive())
    }

    pub fn list_for(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let path = self.file_for(date);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(contents
            .lines()
            .filter_map(parse_row)
            .map(|(name, time)| AttendanceRecord { name, time, date })
            .collect())
    }

    fn read_names(&self, date: NaiveDate) -> Result<HashSet<String>> {
        Ok(self.list_for(date)?.into_iter().map(|r| r.name).collect())
    }

    fn lock_day(&self) -> MutexGuard<'_, LedgerDay> {
        // The set is a cache of the file; a poisoned guard is still usable
        self.day.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn format_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn parse_row(line: &str) -> Option<(String, String)> {
    if line.trim().is_empty() {
        return None;
    }

    let (name, rest) = if let Some(quoted) = line.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    name.push('"');
                    chars.next();
                } else {
                    end = Some(i + 1);
                    break;
                }
            } else {
                name.push(c);
            }
        }
        (name, &quoted[end?..])
    } else {
        match line.find(',') {
            Some(i) => (line[..i].to_string(), &line[i..]),
            None => (line.to_string(), ""),
        }
    };

    let time = rest.strip_prefix(',').unwrap_or(rest).trim_end().to_string();
    Some((name, time))
}
