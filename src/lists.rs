//! List discovery stage: walks a profile's lists page and registers every
//! curated list with initial status `pending`.

use std::path::Path;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Selector};

use crate::cli::ListsArgs;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::ident;
use crate::model::{AuditEntry, Item, ListId, NewList};
use crate::retry::{RetryPolicy, with_backoff};
use crate::store::{Store, persist_item};

const ACTOR: &str = "lists";

pub async fn run(args: ListsArgs) -> anyhow::Result<()> {
    let store = Store::open(Path::new(&args.db)).await.context("open store")?;
    store.assert_schema().await?;
    let fetcher = HttpFetcher::new().context("build http client")?;

    discover(&store, &fetcher, &args.url).await
}

pub async fn discover(store: &Store, fetcher: &dyn Fetcher, profile_url: &str) -> anyhow::Result<()> {
    let owner = ident::resolve_owner_profile(profile_url)
        .context("derive owner profile from profile url")?;

    let policy = RetryPolicy::default();
    let html = with_backoff(policy, "fetch profile lists page", || {
        fetcher.fetch(profile_url)
    })
    .await
    .with_context(|| format!("fetch profile lists page: {profile_url}"))?;

    let discovered = parse_profile_lists(&html, profile_url, &owner)?;
    tracing::info!(count = discovered.len(), owner = %owner, "discovered lists");

    for list in &discovered {
        let item = Item::List(list.clone());
        match with_backoff(policy, "register list", || persist_item(store, &item)).await {
            Ok(()) => {
                tracing::info!(list_id = list.list_id.0, title = %list.title, "registered list");
                store
                    .record_audit(&AuditEntry::success(ACTOR, "list", list.list_id.to_string()))
                    .await
                    .context("record audit")?;
            }
            Err(err) => {
                tracing::warn!(list_id = list.list_id.0, %err, "could not register list");
                store
                    .record_audit(&AuditEntry::failed(
                        ACTOR,
                        "list",
                        list.list_id.to_string(),
                        err.to_string(),
                    ))
                    .await
                    .context("record audit")?;
            }
        }
    }

    Ok(())
}

/// Extracts list entries from a rendered profile page.
///
/// A list entry is a heading whose parent container holds at least two links;
/// the second link is the list link (the first is the profile self-link).
/// Headings with fewer links are skipped silently; a qualifying link whose
/// href does not parse into a list id is logged and skipped without aborting
/// the page.
pub fn parse_profile_lists(
    html: &str,
    base_url: &str,
    owner: &str,
) -> anyhow::Result<Vec<NewList>> {
    let document = Html::parse_document(html);
    let heading = selector("h3")?;
    let anchor = selector("a")?;

    let mut out = Vec::new();
    for h3 in document.select(&heading) {
        let Some(parent) = h3.parent().and_then(ElementRef::wrap) else {
            continue;
        };

        let links: Vec<ElementRef<'_>> = parent.select(&anchor).collect();
        if links.len() < 2 {
            continue;
        }

        let list_link = links[1];
        let Some(href) = list_link.value().attr("href") else {
            continue;
        };

        match ident::resolve_list_identifier(href) {
            Ok((list_id, _slug)) => {
                let url = ident::absolutize(base_url, href)
                    .with_context(|| format!("absolutize list href: {href}"))?;
                let title = list_link.text().collect::<String>().trim().to_owned();
                out.push(NewList {
                    list_id: ListId(list_id),
                    title,
                    url,
                    owner_profile: owner.to_owned(),
                });
            }
            Err(err) => {
                tracing::warn!(%err, href, "skipping list entry with malformed link");
            }
        }
    }

    Ok(out)
}

pub(crate) fn selector(css: &'static str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("invalid selector `{css}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_PAGE: &str = r#"
        <html><body>
          <div class="user-list">
            <h3>Sho-Comi</h3>
            <a href="/deirdre">deirdre</a>
            <a href="/deirdre/lists/revista_sho-comi_116039">Revista Sho-Comi</a>
          </div>
          <div class="user-list">
            <h3>Shonen Jump</h3>
            <a href="/deirdre">deirdre</a>
            <a href="/deirdre/lists/shonen_jump_2024_131179">Shonen Jump 2024</a>
          </div>
          <div class="sidebar">
            <h3>About</h3>
            <a href="/deirdre">deirdre</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn second_sibling_link_is_the_list_link() {
        let lists = parse_profile_lists(PROFILE_PAGE, "https://www.whakoom.com/deirdre/lists", "deirdre")
            .expect("parse profile page");

        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].list_id, ListId(116039));
        assert_eq!(lists[0].title, "Revista Sho-Comi");
        assert_eq!(
            lists[0].url,
            "https://www.whakoom.com/deirdre/lists/revista_sho-comi_116039"
        );
        assert_eq!(lists[1].list_id, ListId(131179));
        assert_eq!(lists[1].owner_profile, "deirdre");
    }

    #[test]
    fn heading_with_one_link_is_skipped_not_an_error() {
        let html = r#"<div><h3>Lonely</h3><a href="/deirdre">deirdre</a></div>"#;
        let lists = parse_profile_lists(html, "https://www.whakoom.com/deirdre/lists", "deirdre")
            .expect("parse");
        assert!(lists.is_empty());
    }

    #[test]
    fn malformed_list_href_skips_only_that_entry() {
        let html = r#"
          <div><h3>Bad</h3><a href="/deirdre">a</a><a href="/deirdre/lists/no_numeric_suffix_here">b</a></div>
          <div><h3>Good</h3><a href="/deirdre">a</a><a href="/deirdre/lists/good_42">Good</a></div>
        "#;
        let lists = parse_profile_lists(html, "https://www.whakoom.com/deirdre/lists", "deirdre")
            .expect("parse");
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].list_id, ListId(42));
    }
}
