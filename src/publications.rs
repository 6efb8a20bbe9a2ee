//! Publication stage: drives registered lists through the scrape lifecycle,
//! resolves every discovered volume to its parent title, and writes the
//! deduplicated title/volume/membership graph.
//!
//! The bookkeeping here exists so that no list is ever left in an
//! indeterminate status: a list that reaches `in_progress` always ends a
//! clean run as `completed` or `failed`. Individual volume failures degrade
//! data completeness but never block the rest of the crawl; only a fetch
//! failure on the list's own page marks the list `failed`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use anyhow::Context as _;
use scraper::Html;
use serde::Serialize;

use crate::cli::PublicationsArgs;
use crate::fetch::{ClickOutcome, Fetcher, HttpFetcher};
use crate::ident;
use crate::lists::selector;
use crate::model::{
    AuditEntry, Item, ListKey, ListRecord, NewTitle, NewVolume, ScrapeStatus, TitleId, VolumeId,
};
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::{ListFilter, Store, persist_item};

const ACTOR: &str = "publications";

/// Id of the incremental-reveal control on list pages.
const LOAD_MORE_CONTROL: &str = "loadmoreissues";
/// Class of the elements that appear after a successful reveal.
const REVEAL_ITEM_CLASS: &str = "list__item";
/// Volume link candidates on a list page. These are always volume URLs,
/// never title URLs; the two must not be conflated.
const VOLUME_LINK_SELECTOR: &str = "span.title a";
/// The parent-title link is the first link inside the comic info container
/// on a volume page.
const PARENT_TITLE_SELECTOR: &str = "div.comic-info a";

pub async fn run(args: PublicationsArgs) -> anyhow::Result<()> {
    let store = Store::open(Path::new(&args.db)).await.context("open store")?;
    store.assert_schema().await?;
    let fetcher = HttpFetcher::new().context("build http client")?;

    let selection = if args.all {
        ListSelection::All
    } else {
        ListSelection::Pending
    };

    let summary = Orchestrator::new(&store, &fetcher).run(selection).await?;
    tracing::info!(
        lists_started = summary.lists_started,
        lists_completed = summary.lists_completed,
        lists_failed = summary.lists_failed,
        volumes_ingested = summary.volumes_ingested,
        volumes_skipped = summary.volumes_skipped,
        "publication run finished"
    );
    println!(
        "{}",
        serde_json::to_string(&summary).context("serialize run summary")?
    );

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSelection {
    /// Lists with status `pending` (the default).
    Pending,
    /// Every registered list, for a forced re-scrape.
    All,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub lists_started: usize,
    pub lists_completed: usize,
    pub lists_failed: usize,
    pub volumes_ingested: usize,
    pub volumes_skipped: usize,
}

/// Run-scoped completion bookkeeping. Owned by one run and discarded with
/// it; nothing here survives across runs.
#[derive(Debug, Default)]
struct RunTracker {
    started: HashSet<ListKey>,
    /// Lists where at least one volume wrote its full triple.
    processed: HashSet<ListKey>,
    failed: HashSet<ListKey>,
}

pub struct Orchestrator<'a> {
    store: &'a Store,
    fetcher: &'a dyn Fetcher,
    policy: RetryPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a Store, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            store,
            fetcher,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn run(&self, selection: ListSelection) -> anyhow::Result<RunSummary> {
        let filter = match selection {
            ListSelection::Pending => ListFilter::WithStatus(ScrapeStatus::Pending),
            ListSelection::All => ListFilter::All,
        };

        // The selection query is the only run-fatal condition; everything
        // below is caught at list or volume scope.
        let lists = self
            .store
            .get_lists(filter)
            .await
            .context("select lists to scrape")?;
        tracing::info!(count = lists.len(), ?selection, "selected lists");

        let mut tracker = RunTracker::default();
        let mut summary = RunSummary::default();
        for list in &lists {
            self.scrape_list(list, &mut tracker, &mut summary).await;
        }

        self.finish(&tracker, &mut summary).await;
        Ok(summary)
    }

    async fn scrape_list(
        &self,
        list: &ListRecord,
        tracker: &mut RunTracker,
        summary: &mut RunSummary,
    ) {
        let begun = Instant::now();

        // Record the start before anything else: a list with zero volumes,
        // or one where every volume fails, must still be finalized.
        if let Err(err) = self
            .store
            .set_list_status(list.key, ScrapeStatus::InProgress)
            .await
        {
            tracing::error!(list_id = list.list_id.0, %err, "could not mark list in progress");
            return;
        }
        tracker.started.insert(list.key);
        self.audit(AuditEntry::started(ACTOR, "list", list.list_id.to_string()))
            .await;

        let volume_urls = match self.discover_volume_urls(&list.url).await {
            Ok(urls) => urls,
            Err(err) => {
                // Request-level failure on the list's own page. Mark failed
                // inline, keyed by the database primary key.
                tracing::warn!(list_id = list.list_id.0, url = %list.url, %err, "list fetch failed");
                tracker.failed.insert(list.key);
                if let Err(update_err) = self
                    .store
                    .set_list_status(list.key, ScrapeStatus::Failed)
                    .await
                {
                    tracing::error!(list_id = list.list_id.0, %update_err, "could not mark list failed");
                }
                self.audit(
                    AuditEntry::failed(ACTOR, "list", list.list_id.to_string(), format!("{err:#}"))
                        .with_duration_ms(begun.elapsed().as_millis() as i64),
                )
                .await;
                return;
            }
        };
        tracing::info!(list_id = list.list_id.0, count = volume_urls.len(), "discovered volume links");

        for volume_url in &volume_urls {
            match self.ingest_volume(list, volume_url).await {
                Ok(()) => {
                    tracker.processed.insert(list.key);
                    summary.volumes_ingested += 1;
                }
                Err(err) => {
                    tracing::warn!(list_id = list.list_id.0, url = %volume_url, %err, "skipping volume");
                    summary.volumes_skipped += 1;
                }
            }
        }

        self.audit(
            AuditEntry::success(ACTOR, "list", list.list_id.to_string())
                .with_duration_ms(begun.elapsed().as_millis() as i64),
        )
        .await;
    }

    /// Opens the list page and drives the reveal control until it stops
    /// producing new items; a timed-out reveal is the normal end of
    /// pagination, not an error.
    async fn discover_volume_urls(&self, list_url: &str) -> anyhow::Result<Vec<String>> {
        let mut session = with_backoff(self.policy, "open list page", || {
            self.fetcher.open(list_url)
        })
        .await
        .with_context(|| format!("open list page: {list_url}"))?;

        loop {
            match session
                .click_and_wait(LOAD_MORE_CONTROL, REVEAL_ITEM_CLASS)
                .await
                .context("reveal more list items")?
            {
                ClickOutcome::Revealed => continue,
                ClickOutcome::TimedOut => break,
            }
        }

        extract_volume_links(&session.content(), list_url)
    }

    /// Resolves one volume URL into its Title + Volume + Membership triple.
    /// The title write happens-before the volume and membership writes. Every
    /// failure is scoped to this single volume and audited exactly once.
    async fn ingest_volume(&self, list: &ListRecord, volume_url: &str) -> anyhow::Result<()> {
        let resolved = match self.resolve_volume(volume_url).await {
            Ok(resolved) => resolved,
            Err(err) => {
                self.audit(AuditEntry::failed(
                    ACTOR,
                    "volume",
                    volume_url.to_owned(),
                    format!("{err:#}"),
                ))
                .await;
                return Err(err);
            }
        };

        let title_id = resolved.title.title_id;
        let volume_id = resolved.volume.volume_id.clone();

        self.persist(Item::Title(resolved.title), "title", title_id.to_string())
            .await?;
        self.persist(Item::Volume(resolved.volume), "volume", volume_id.to_string())
            .await?;
        self.persist(
            Item::Membership {
                list: list.key,
                title: title_id,
                position: None,
            },
            "membership",
            format!("{}:{title_id}", list.list_id),
        )
        .await?;

        Ok(())
    }

    async fn resolve_volume(&self, volume_url: &str) -> anyhow::Result<ResolvedVolume> {
        let html = with_backoff(self.policy, "fetch volume page", || {
            self.fetcher.fetch(volume_url)
        })
        .await
        .with_context(|| format!("fetch volume page: {volume_url}"))?;

        let parent = extract_parent_title_link(&html)?
            .ok_or_else(|| anyhow::anyhow!("volume page has no parent title link: {volume_url}"))?;

        let volume_id = ident::resolve_volume_identifier(volume_url)?;
        let title_id = ident::resolve_title_identifier(&parent.href)?;
        let title_url = ident::absolutize(volume_url, &parent.href)
            .with_context(|| format!("absolutize parent title href: {}", parent.href))?;

        Ok(ResolvedVolume {
            title: NewTitle {
                title_id: TitleId(title_id),
                display_name: parent.text,
                url: title_url,
            },
            volume: NewVolume {
                volume_id: VolumeId(volume_id),
                title_id: TitleId(title_id),
                url: volume_url.to_owned(),
            },
        })
    }

    /// One logical write under the retry policy. Every terminal outcome is
    /// audited: a success entry on write, a single failed entry on
    /// exhaustion (after which the item is dropped).
    async fn persist(
        &self,
        item: Item,
        operation: &'static str,
        entity_id: String,
    ) -> anyhow::Result<()> {
        match with_backoff(self.policy, operation, || persist_item(self.store, &item)).await {
            Ok(()) => {
                self.audit(AuditEntry::success(ACTOR, operation, entity_id)).await;
                Ok(())
            }
            Err(err) => {
                self.audit(AuditEntry::failed(
                    ACTOR,
                    operation,
                    entity_id,
                    err.to_string(),
                ))
                .await;
                Err(anyhow::Error::new(err).context(format!("persist {operation}")))
            }
        }
    }

    /// Two-track completion: failed lists stay failed; every other started
    /// list becomes `completed`, whether fully or only partially processed.
    async fn finish(&self, tracker: &RunTracker, summary: &mut RunSummary) {
        for key in &tracker.started {
            if tracker.failed.contains(key) {
                summary.lists_failed += 1;
                continue;
            }
            match self
                .store
                .set_list_status(*key, ScrapeStatus::Completed)
                .await
            {
                Ok(()) => summary.lists_completed += 1,
                Err(err) => {
                    tracing::error!(key = key.0, %err, "could not finalize list status");
                }
            }
        }
        summary.lists_started = tracker.started.len();
        tracing::debug!(
            started = tracker.started.len(),
            fully_processed = tracker.processed.len(),
            failed = tracker.failed.len(),
            "completion bookkeeping"
        );

        self.audit(AuditEntry::success(ACTOR, "run_finished", "run".to_owned()))
            .await;
    }

    /// Audit writes must never abort scraping; failures are only logged.
    async fn audit(&self, entry: AuditEntry) {
        if let Err(err) = self.store.record_audit(&entry).await {
            tracing::error!(%err, "audit write failed");
        }
    }
}

struct ResolvedVolume {
    title: NewTitle,
    volume: NewVolume,
}

struct ParentLink {
    href: String,
    text: String,
}

/// Volume URL candidates from a fully revealed list page, in page order.
fn extract_volume_links(html: &str, list_url: &str) -> anyhow::Result<Vec<String>> {
    let document = Html::parse_document(html);
    let links = selector(VOLUME_LINK_SELECTOR)?;

    let mut out = Vec::new();
    for anchor in document.select(&links) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        match ident::absolutize(list_url, href) {
            Ok(url) => out.push(url),
            Err(err) => {
                tracing::warn!(%err, href, "skipping volume link that does not resolve");
            }
        }
    }

    Ok(out)
}

fn extract_parent_title_link(html: &str) -> anyhow::Result<Option<ParentLink>> {
    let document = Html::parse_document(html);
    let links = selector(PARENT_TITLE_SELECTOR)?;

    let Some(anchor) = document.select(&links).next() else {
        return Ok(None);
    };
    let Some(href) = anchor.value().attr("href") else {
        return Ok(None);
    };

    Ok(Some(ParentLink {
        href: href.to_owned(),
        text: anchor.text().collect::<String>().trim().to_owned(),
    }))
}
