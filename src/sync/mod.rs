// src/sync/mod.rs
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use std::collections::BTreeSet;
use tracing::info;

use crate::config::Config;
use crate::fetch::{CurveSource, FetchOutcome};
use crate::history::{load_existing, DatasetStore};
use crate::process::{date_parser::format_reference_date, flatten_columns, Table};

pub mod merge;

pub use merge::{concat_tables, merge_datasets, sort_by_reference_date};

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Distinct reference dates found in the stored dataset.
    pub known_dates: usize,
    /// Window dates not fetched because they are already stored.
    pub skipped: usize,
    pub downloaded: usize,
    pub unavailable: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Nothing new in the window; the destination was not touched.
    NothingToSave(SyncStats),
    Saved { stats: SyncStats, total_rows: usize },
}

impl SyncOutcome {
    pub fn stats(&self) -> SyncStats {
        match self {
            SyncOutcome::NothingToSave(stats) | SyncOutcome::Saved { stats, .. } => *stats,
        }
    }
}

/// One incremental sync: load, fetch the missing window dates, merge, save.
pub struct Syncer<S, D> {
    source: S,
    store: D,
    window_days: u32,
}

impl<S: CurveSource, D: DatasetStore> Syncer<S, D> {
    pub fn new(config: &Config, source: S, store: D) -> Self {
        Self {
            source,
            store,
            window_days: config.window_days,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    /// The `window_days` calendar days ending at `today`, most recent first.
    pub fn window(&self, today: NaiveDate) -> Vec<NaiveDate> {
        (0..u64::from(self.window_days))
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .collect()
    }

    /// Fetch every window date not in `known`. `None` when nothing came back.
    pub async fn fetch_missing(
        &self,
        today: NaiveDate,
        known: &BTreeSet<NaiveDate>,
        stats: &mut SyncStats,
    ) -> Result<Option<Table>> {
        let mut batches = Vec::new();

        for day in self.window(today) {
            let label = format_reference_date(day);
            if known.contains(&day) {
                info!(date = %label, "already stored, skipping");
                stats.skipped += 1;
                continue;
            }

            match self.source.fetch(day).await {
                FetchOutcome::Fetched(table) => {
                    info!(date = %label, rows = table.num_rows(), "downloaded");
                    stats.downloaded += 1;
                    batches.push(table);
                }
                FetchOutcome::Unavailable => {
                    info!(date = %label, "no data");
                    stats.unavailable += 1;
                }
            }
        }

        info!(
            downloaded = stats.downloaded,
            skipped = stats.skipped,
            unavailable = stats.unavailable,
            "window checked"
        );

        if batches.is_empty() {
            return Ok(None);
        }
        let combined = concat_tables(&batches).context("combining fetched snapshots")?;
        Ok(Some(flatten_columns(combined)))
    }

    pub async fn run(&self, today: NaiveDate) -> Result<SyncOutcome> {
        let (existing, known) = load_existing(&self.store);
        info!(dates = known.len(), "reference dates already stored");
        let mut stats = SyncStats {
            known_dates: known.len(),
            ..SyncStats::default()
        };

        let Some(new_rows) = self.fetch_missing(today, &known, &mut stats).await? else {
            info!("nothing new to save");
            return Ok(SyncOutcome::NothingToSave(stats));
        };

        let merged = sort_by_reference_date(merge_datasets(existing, new_rows)?)?;
        let total_rows = merged.num_rows();
        self.store.save(&merged).context("saving dataset")?;
        info!(rows = total_rows, "dataset saved");

        Ok(SyncOutcome::Saved { stats, total_rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::snapshot_from_html;
    use crate::history::XlsxStore;
    use crate::process::Cell;
    use anyhow::bail;
    use calamine::{open_workbook, Data, Reader, Xlsx};
    use std::{
        cell::{Cell as StdCell, RefCell},
        collections::HashMap,
        fs,
    };
    use tempfile::tempdir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn days_ago(n: u64) -> NaiveDate {
        today().checked_sub_days(Days::new(n)).unwrap()
    }

    /// A snapshot the way the provider publishes it: one row per vertex.
    fn snapshot(day: NaiveDate, rates: &[&str]) -> Table {
        let rows: String = rates
            .iter()
            .enumerate()
            .map(|(i, r)| format!("<tr><td>{}</td><td>{}</td></tr>", (i + 1) * 252, r))
            .collect();
        let html = format!(
            "<table><tr><th>Vertices</th><th>Prefixados</th></tr>{}</table>",
            rows
        );
        snapshot_from_html(&html, day).unwrap()
    }

    #[derive(Default)]
    struct FakeSource {
        published: HashMap<NaiveDate, Table>,
        calls: RefCell<Vec<NaiveDate>>,
    }

    impl FakeSource {
        fn with(days: &[NaiveDate]) -> Self {
            let published = days
                .iter()
                .map(|d| (*d, snapshot(*d, &["13,45"])))
                .collect();
            Self {
                published,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<NaiveDate> {
            self.calls.borrow().clone()
        }
    }

    impl CurveSource for FakeSource {
        async fn fetch(&self, reference_date: NaiveDate) -> FetchOutcome {
            self.calls.borrow_mut().push(reference_date);
            match self.published.get(&reference_date) {
                Some(t) => FetchOutcome::Fetched(t.clone()),
                None => FetchOutcome::Unavailable,
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        table: RefCell<Option<Table>>,
        saves: StdCell<usize>,
        fail_saves: bool,
    }

    impl DatasetStore for MemoryStore {
        fn load(&self) -> Result<Option<Table>> {
            Ok(self.table.borrow().clone())
        }

        fn save(&self, table: &Table) -> Result<()> {
            if self.fail_saves {
                bail!("disk full");
            }
            self.saves.set(self.saves.get() + 1);
            *self.table.borrow_mut() = Some(table.clone());
            Ok(())
        }
    }

    fn data_column(t: &Table) -> Vec<String> {
        (0..t.num_rows())
            .map(|r| match t.cell(0, r) {
                Cell::Text(s) => s.to_string(),
                other => panic!("unexpected cell {:?}", other),
            })
            .collect()
    }

    #[test]
    fn window_runs_backwards_from_today() {
        let s = Syncer::new(&Config::default(), FakeSource::default(), MemoryStore::default());
        let w = s.window(today());
        assert_eq!(w.len(), 7);
        assert_eq!(w[0], today());
        assert_eq!(w[6], days_ago(6));
    }

    #[tokio::test]
    async fn empty_destination_gets_today_and_yesterday_in_order() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ettj.xlsx");
        let source = FakeSource::with(&[today(), days_ago(1)]);
        let syncer = Syncer::new(&Config::default(), source, XlsxStore::new(&path, "ETTJ"));

        let outcome = syncer.run(today()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Saved {
                stats: SyncStats {
                    known_dates: 0,
                    skipped: 0,
                    downloaded: 2,
                    unavailable: 5,
                },
                total_rows: 2,
            }
        );
        assert_eq!(syncer.source().calls().len(), 7);

        let saved = syncer.store().load().unwrap().unwrap();
        assert_eq!(data_column(&saved), vec!["15/10/2026", "16/10/2026"]);
        assert_eq!(saved.cell(2, 0), Cell::Number(13.45));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ettj.xlsx");
        let window: Vec<NaiveDate> = (0..7).map(days_ago).collect();
        let syncer = Syncer::new(
            &Config::default(),
            FakeSource::with(&window),
            XlsxStore::new(&path, "ETTJ"),
        );

        syncer.run(today()).await.unwrap();
        let first_bytes = fs::read(&path).unwrap();
        let calls_after_first = syncer.source().calls().len();

        let outcome = syncer.run(today()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::NothingToSave(SyncStats {
                known_dates: 7,
                skipped: 7,
                downloaded: 0,
                unavailable: 0,
            })
        );
        assert_eq!(syncer.source().calls().len(), calls_after_first);
        assert_eq!(fs::read(&path).unwrap(), first_bytes);
    }

    #[tokio::test]
    async fn stored_today_is_skipped_without_fetching() {
        let store = MemoryStore::default();
        *store.table.borrow_mut() = Some(snapshot(today(), &["13,00"]));
        let syncer = Syncer::new(
            &Config::default(),
            FakeSource::with(&[today(), days_ago(2)]),
            store,
        );

        let outcome = syncer.run(today()).await.unwrap();
        let stats = outcome.stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.downloaded, 1);
        assert!(!syncer.source().calls().contains(&today()));
        assert_eq!(syncer.source().calls().len(), 6);

        let saved = syncer.store().table.borrow().clone().unwrap();
        assert_eq!(data_column(&saved), vec!["14/10/2026", "16/10/2026"]);
    }

    #[tokio::test]
    async fn unavailable_dates_do_not_stop_the_run() {
        // only the oldest window date is published; every other fetch fails
        let syncer = Syncer::new(
            &Config::default(),
            FakeSource::with(&[days_ago(6)]),
            MemoryStore::default(),
        );
        let outcome = syncer.run(today()).await.unwrap();
        assert_eq!(outcome.stats().unavailable, 6);
        assert_eq!(outcome.stats().downloaded, 1);
        assert_eq!(syncer.store().saves.get(), 1);
    }

    #[tokio::test]
    async fn nothing_published_means_no_write() {
        let syncer = Syncer::new(
            &Config::default(),
            FakeSource::default(),
            MemoryStore::default(),
        );
        let outcome = syncer.run(today()).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::NothingToSave(_)));
        assert_eq!(syncer.store().saves.get(), 0);
    }

    #[tokio::test]
    async fn multi_row_snapshots_are_kept_whole() {
        let mut source = FakeSource::default();
        source
            .published
            .insert(today(), snapshot(today(), &["13,1", "12,9", "12,5"]));
        source
            .published
            .insert(days_ago(3), snapshot(days_ago(3), &["13,0", "12,8"]));

        let store = MemoryStore::default();
        *store.table.borrow_mut() = Some(snapshot(days_ago(10), &["11,0"]));
        let syncer = Syncer::new(&Config::default(), source, store);

        let outcome = syncer.run(today()).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Saved {
                stats: SyncStats {
                    known_dates: 1,
                    skipped: 0,
                    downloaded: 2,
                    unavailable: 5,
                },
                total_rows: 6,
            }
        );
        let saved = syncer.store().table.borrow().clone().unwrap();
        assert_eq!(
            data_column(&saved),
            vec![
                "06/10/2026",
                "13/10/2026",
                "13/10/2026",
                "16/10/2026",
                "16/10/2026",
                "16/10/2026",
            ]
        );
    }

    #[tokio::test]
    async fn new_columns_are_added_to_old_rows_as_blanks() {
        let mut source = FakeSource::default();
        let html = "<table><tr><th>Vertices</th><th>Prefixados</th><th>IPCA</th></tr>\
                    <tr><td>252</td><td>13,1</td><td>7,2</td></tr></table>";
        source
            .published
            .insert(today(), snapshot_from_html(html, today()).unwrap());

        let store = MemoryStore::default();
        *store.table.borrow_mut() = Some(snapshot(days_ago(8), &["11,0"]));
        let syncer = Syncer::new(&Config::default(), source, store);
        syncer.run(today()).await.unwrap();

        let saved = syncer.store().table.borrow().clone().unwrap();
        let labels: Vec<String> = saved.labels().map(|l| l.to_string()).collect();
        assert_eq!(labels, vec!["Data", "Vertices", "Prefixados", "IPCA"]);
        assert_eq!(saved.cell(3, 0), Cell::Missing);
        assert_eq!(saved.cell(3, 1), Cell::Number(7.2));
    }

    #[tokio::test]
    async fn stored_numbers_stay_numbers_when_a_new_snapshot_has_text() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ettj.xlsx");
        let store = XlsxStore::new(&path, "ETTJ");
        store.save(&snapshot(days_ago(9), &["13,45", "12,5"])).unwrap();

        let mut source = FakeSource::default();
        source
            .published
            .insert(today(), snapshot(today(), &["13,1", "-"]));
        let syncer = Syncer::new(&Config::default(), source, store);
        syncer.run(today()).await.unwrap();

        let mut book: Xlsx<_> = open_workbook(&path).unwrap();
        let sheet = book.worksheet_range("ETTJ").unwrap();
        assert_eq!(sheet.get_value((1, 2)), Some(&Data::Float(13.45)));
        assert_eq!(sheet.get_value((2, 2)), Some(&Data::Float(12.5)));
        assert_eq!(sheet.get_value((4, 2)), Some(&Data::String("-".into())));
        assert_eq!(sheet.get_value((1, 1)), Some(&Data::Float(252.0)));

        let saved = syncer.store().load().unwrap().unwrap();
        assert_eq!(
            data_column(&saved),
            vec!["07/10/2026", "07/10/2026", "16/10/2026", "16/10/2026"]
        );
        assert_eq!(saved.cell(2, 0), Cell::Number(13.45));
        assert_eq!(saved.cell(2, 3), Cell::Text("-"));
    }

    #[tokio::test]
    async fn save_failures_propagate() {
        let store = MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        };
        let syncer = Syncer::new(&Config::default(), FakeSource::with(&[today()]), store);
        let err = syncer.run(today()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
    }

    #[tokio::test]
    async fn window_size_comes_from_config() {
        let config = Config {
            window_days: 2,
            ..Config::default()
        };
        let syncer = Syncer::new(&config, FakeSource::default(), MemoryStore::default());
        syncer.run(today()).await.unwrap();
        assert_eq!(syncer.source().calls(), vec![today(), days_ago(1)]);
    }
}
