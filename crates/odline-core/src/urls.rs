//! Endpoint URLs for one entity set

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::Url;
use serde::Deserialize;

use crate::error::TransportError;
use crate::http::parse_url;
use crate::partition::Page;

const FIELD_SEPARATOR: &str = ",";

/// Escaped in query option values. `$`, `,`, `(` and `)` stay literal and a
/// space becomes `%20`, never `+`. `'` is escaped because the URL serializer
/// escapes it in http(s) queries regardless.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// OData system query options in request order.
#[derive(Default)]
struct QueryOptions(Vec<String>);

impl QueryOptions {
    fn push(&mut self, name: &str, value: &str) {
        self.0
            .push(format!("{name}={}", utf8_percent_encode(value, QUERY_VALUE)));
    }

    fn apply(self, url: &mut Url) {
        if self.0.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&self.0.join("&")));
        }
    }
}

/// Which entity to read and which query fragments to pass along.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EntityQuery {
    pub entity: String,
    pub associated_entity: Option<String>,
    pub filter: Option<String>,
    pub select: Option<String>,
    pub expand: Option<String>,
    /// Non-navigational fields used for `$select` on data pages when no
    /// explicit select is configured.
    pub default_fields: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl EntityQuery {
    pub fn filter(&self) -> Option<&str> {
        non_empty(&self.filter)
    }

    pub fn select(&self) -> Option<&str> {
        non_empty(&self.select)
    }

    pub fn expand(&self) -> Option<&str> {
        non_empty(&self.expand)
    }

    pub fn associated_entity(&self) -> Option<&str> {
        non_empty(&self.associated_entity)
    }

    /// `$select` for data pages: the configured value, else the default
    /// field list with the expand fragment appended.
    fn data_select(&self) -> Option<String> {
        if let Some(select) = self.select() {
            return Some(select.to_string());
        }
        if self.default_fields.is_empty() {
            return None;
        }
        let mut fields = self.default_fields.join(FIELD_SEPARATOR);
        if let Some(expand) = self.expand() {
            fields.push_str(FIELD_SEPARATOR);
            fields.push_str(expand);
        }
        Some(fields)
    }
}

/// Builds tester, metadata, count and data URLs from a base URL.
#[derive(Debug, Clone)]
pub struct ServiceUrls {
    base: Url,
    query: EntityQuery,
}

impl ServiceUrls {
    pub fn new(base_url: &str, query: EntityQuery) -> Result<Self, TransportError> {
        let base = parse_url(base_url)?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            });
        }
        Ok(Self { base, query })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn query(&self) -> &EntityQuery {
        &self.query
    }

    /// `<base>/<entity>` plus filter/select/expand and `$top=1`.
    pub fn tester(&self) -> Url {
        let mut url = self.with_segments(&[&self.query.entity]);
        let mut options = QueryOptions::default();
        if let Some(filter) = self.query.filter() {
            options.push("$filter", filter);
        }
        if let Some(select) = self.query.select() {
            options.push("$select", select);
        }
        if let Some(expand) = self.query.expand() {
            options.push("$expand", expand);
        }
        options.push("$top", "1");
        options.apply(&mut url);
        log::debug!("Tester endpoint: {url}");
        url
    }

    /// `<base>/<entity>/$metadata`, or `<base>/<entity>,<associated>/$metadata`.
    pub fn metadata(&self) -> Url {
        let entity = match self.query.associated_entity() {
            Some(assoc) => format!("{}{FIELD_SEPARATOR}{assoc}", self.query.entity),
            None => self.query.entity.clone(),
        };
        let url = self.with_segments(&[&entity, "$metadata"]);
        log::debug!("Metadata endpoint: {url}");
        url
    }

    /// `<base>/<entity>/$count`, carrying only the filter.
    pub fn count(&self) -> Url {
        let mut url = self.with_segments(&[&self.query.entity, "$count"]);
        let mut options = QueryOptions::default();
        if let Some(filter) = self.query.filter() {
            options.push("$filter", filter);
        }
        options.apply(&mut url);
        log::debug!("Count endpoint: {url}");
        url
    }

    /// Data page URL. `$skip` is omitted when zero.
    pub fn data(&self, page: Page) -> Url {
        let mut url = self.with_segments(&[&self.query.entity]);
        let mut options = QueryOptions::default();
        if let Some(filter) = self.query.filter() {
            options.push("$filter", filter);
        }
        if let Some(select) = self.query.data_select() {
            options.push("$select", &select);
        }
        if let Some(expand) = self.query.expand() {
            options.push("$expand", expand);
        }
        if page.skip != 0 {
            options.push("$skip", &page.skip.to_string());
        }
        options.push("$top", &page.top.to_string());
        options.apply(&mut url);
        log::debug!("Data endpoint: {url}");
        url
    }

    fn with_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        url
    }
}
