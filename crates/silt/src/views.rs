//! The view query planner.
//!
//! A closed family of named view shapes over the profile tables. Each view
//! compiles to parameterized SQL; the `(design, view)` string form is kept
//! only for wire-level compatibility with callers that address views by
//! name ([`View::parse`]).
//!
//! Every view takes a filter with `limit`, `skip` and `descending`; event
//! views order by their indexed columns then `ts_created`, and descending
//! reverses every ordering key. Rows come back as `(id, key, value)` with
//! the full document attached when `id_only` is off.

use serde_json::{Value as Json, json};

use crate::error::{Error, Result};
use crate::profile::TableKind;
use crate::sql::{BuiltQuery, SqlBuilder};

/// Result row of a view query.
#[derive(Debug, Clone)]
pub struct ViewRow {
    pub id: String,
    /// The view's key tuple for this row, where the view defines one.
    pub key: Vec<Json>,
    /// Light projection of indexed columns; shape depends on the view.
    pub value: Json,
    /// Full document, when fetched.
    pub doc: Option<Json>,
}

/// Query filter shared by all views.
#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub descending: bool,
}

/// Lifecycle availability values; a `by_lcstate` key matching one of these
/// queries the availability column instead of maturity.
pub const AVAILABILITY_STATES: &[&str] = &["AVAILABLE", "PRIVATE", "DISCOVERABLE"];

/// A named view query over one datastore.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    ResourceByType {
        restype: Option<String>,
    },
    ResourceByLcstate {
        state: String,
        use_availability: bool,
        restype: Option<String>,
    },
    ResourceByName {
        name: String,
        restype: Option<String>,
    },
    ResourceByKeyword {
        keyword: String,
        restype: Option<String>,
    },
    ResourceByNestedType {
        nested_type: String,
        restype: Option<String>,
    },
    ResourceByAttribute {
        attr_name: String,
        attr_value: Option<String>,
        restype: Option<String>,
    },
    ResourceByAltId {
        alt_id: Option<String>,
        alt_id_ns: Option<String>,
    },
    DirByKey {
        org: String,
        key: String,
        parent: String,
        /// Match `parent` as a path prefix instead of exactly.
        parent_prefix: bool,
    },
    DirByParent {
        org: String,
        parent: String,
    },
    DirByPath {
        org: String,
        path: Vec<String>,
    },
    DirByAttribute {
        org: String,
        attr_name: String,
        attr_value: String,
        parent: String,
    },
    EventByOrigin {
        origin: String,
        start_ts: Option<String>,
        end_ts: Option<String>,
    },
    EventByType {
        event_type: String,
        start_ts: Option<String>,
        end_ts: Option<String>,
    },
    EventByOriginType {
        origin: String,
        event_type: String,
        start_ts: Option<String>,
        end_ts: Option<String>,
    },
    EventByTime {
        start_ts: Option<String>,
        end_ts: Option<String>,
    },
    AssocBySubject {
        ids: Vec<String>,
    },
    AssocByObject {
        ids: Vec<String>,
    },
    AttachmentByResource {
        resource_id: String,
    },
}

/// Column layout of a planned view's result set, used to map rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowShape {
    /// id, name, type_, lcstate
    ResourceFull,
    /// id, name, type_
    ResourceName,
    /// id, type_
    ResourceSlim,
    /// id, name, type_, lcstate, availability
    ResourceLcstate,
    /// id, alt_id_ns, alt_id
    ResourceAltId,
    /// id, org, parent, key, doc
    Dir,
    /// id, ts_created
    Event,
    /// id, s, p, o, doc; `value` drawn from the opposite side
    Assoc { subject_side: bool },
    /// id, name, type_, lcstate, keywords
    Attachment,
}

/// A compiled view: SQL plus the row layout needed to read results.
#[derive(Debug)]
pub struct PlannedView {
    pub query: BuiltQuery,
    pub(crate) shape: RowShape,
    pub(crate) id_only: bool,
}

impl View {
    /// Resolve the `(design, view)` string form used on the wire.
    ///
    /// `key` carries an exact-match key tuple, `start_key`/`end_key` a
    /// range, `keys` a bulk id list; which of them a view reads follows
    /// the original addressing.
    pub fn parse(
        design: &str,
        view: &str,
        key: Option<&[String]>,
        keys: Option<&[String]>,
        start_key: Option<&[String]>,
        end_key: Option<&[String]>,
    ) -> Result<View> {
        let start = start_key.unwrap_or(&[]);
        let end = end_key.unwrap_or(&[]);
        let opt = |k: &[String], i: usize| -> Option<String> {
            k.get(i).filter(|s| !s.is_empty()).cloned()
        };
        let req = |k: &[String], i: usize, what: &str| -> Result<String> {
            k.get(i)
                .filter(|s| !s.is_empty())
                .cloned()
                .ok_or_else(|| Error::BadRequest(format!("{design}/{view}: missing {what}")))
        };

        match (design, view) {
            ("resource", "by_type") => Ok(View::ResourceByType {
                restype: opt(start, 0),
            }),
            ("resource", "by_lcstate") => Ok(View::resource_by_lcstate(
                req(start, 0, "lcstate")?,
                opt(start, 1),
            )),
            ("resource", "by_name") => Ok(View::ResourceByName {
                name: req(start, 0, "name")?,
                restype: opt(start, 1),
            }),
            ("resource", "by_keyword") => Ok(View::ResourceByKeyword {
                keyword: req(start, 0, "keyword")?,
                restype: opt(start, 1),
            }),
            ("resource", "by_nested_type") => Ok(View::ResourceByNestedType {
                nested_type: req(start, 0, "nested type")?,
                restype: opt(start, 1),
            }),
            ("resource", "by_attribute") => Ok(View::ResourceByAttribute {
                restype: opt(start, 0),
                attr_name: req(start, 1, "attribute name")?,
                attr_value: opt(start, 2),
            }),
            ("resource", "by_alt_id") => Ok(View::ResourceByAltId {
                alt_id: opt(start, 0),
                alt_id_ns: opt(start, 1),
            }),
            ("directory", "by_key") => {
                if let Some(key) = key {
                    Ok(View::DirByKey {
                        org: req(key, 0, "org")?,
                        key: req(key, 1, "key")?,
                        parent: req(key, 2, "parent")?,
                        parent_prefix: false,
                    })
                } else {
                    Ok(View::DirByKey {
                        org: req(start, 0, "org")?,
                        key: req(start, 1, "key")?,
                        parent: req(start, 2, "parent")?,
                        parent_prefix: true,
                    })
                }
            }
            ("directory", "by_parent") => Ok(View::DirByParent {
                org: req(start, 0, "org")?,
                parent: req(start, 1, "parent")?,
            }),
            ("directory", "by_path") => Ok(View::DirByPath {
                org: req(start, 0, "org")?,
                path: start.iter().skip(1).cloned().collect(),
            }),
            ("directory", "by_attribute") => Ok(View::DirByAttribute {
                org: req(start, 0, "org")?,
                attr_name: req(start, 1, "attribute name")?,
                attr_value: req(start, 2, "attribute value")?,
                parent: req(start, 3, "parent")?,
            }),
            ("event", "by_origin") => Ok(View::EventByOrigin {
                origin: req(start, 0, "origin")?,
                start_ts: opt(start, 1),
                end_ts: opt(end, 1),
            }),
            ("event", "by_type") => Ok(View::EventByType {
                event_type: req(start, 0, "type")?,
                start_ts: opt(start, 1),
                end_ts: opt(end, 1),
            }),
            ("event", "by_origintype") => Ok(View::EventByOriginType {
                origin: req(start, 0, "origin")?,
                event_type: req(start, 1, "type")?,
                start_ts: opt(start, 2),
                end_ts: opt(end, 2),
            }),
            ("event", "by_time") => Ok(View::EventByTime {
                start_ts: opt(start, 0),
                end_ts: opt(end, 0),
            }),
            ("association", "by_subject" | "by_bulk") => Ok(View::AssocBySubject {
                ids: bulk_ids(design, view, key, keys, start)?,
            }),
            ("association", "by_object" | "by_subject_bulk") => Ok(View::AssocByObject {
                ids: bulk_ids(design, view, key, keys, start)?,
            }),
            ("attachment", "by_resource") => Ok(View::AttachmentByResource {
                resource_id: req(start, 0, "resource id")?,
            }),
            _ => Err(Error::BadRequest(format!(
                "unsupported view: {design}/{view}"
            ))),
        }
    }

    /// Build a `by_lcstate` view, splitting compound states down to their
    /// maturity part and routing availability values to the availability
    /// column.
    pub fn resource_by_lcstate(state: impl Into<String>, restype: Option<String>) -> View {
        let mut state: String = state.into();
        if let Some((maturity, _)) = state.split_once('_') {
            state = maturity.to_owned();
        }
        let use_availability = AVAILABILITY_STATES.contains(&state.as_str());
        View::ResourceByLcstate {
            state,
            use_availability,
            restype,
        }
    }

    /// Compile this view to SQL against a datastore.
    pub fn build(&self, ds_name: &str, id_only: bool, filter: &ViewFilter) -> PlannedView {
        match self {
            View::ResourceByType { restype } => {
                let mut b = select_from(ds_name, TableKind::Primary, "id, name, type_, lcstate", id_only);
                if let Some(restype) = restype {
                    b.push(" WHERE lcstate<>'RETIRED' AND type_=");
                    b.push_param(restype.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceFull, id_only)
            }
            View::ResourceByLcstate {
                state,
                use_availability,
                restype,
            } => {
                let mut b = select_from(
                    ds_name,
                    TableKind::Primary,
                    "id, name, type_, lcstate, availability",
                    id_only,
                );
                if *use_availability {
                    b.push(" WHERE availability=");
                } else {
                    b.push(" WHERE lcstate=");
                }
                b.push_param(state.as_str());
                if let Some(restype) = restype {
                    b.push(" AND type_=");
                    b.push_param(restype.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceLcstate, id_only)
            }
            View::ResourceByName { name, restype } => {
                let mut b = select_from(ds_name, TableKind::Primary, "id, name, type_", id_only);
                b.push(" WHERE lcstate<>'RETIRED' AND name=");
                b.push_param(name.as_str());
                if let Some(restype) = restype {
                    b.push(" AND type_=");
                    b.push_param(restype.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceName, id_only)
            }
            View::ResourceByKeyword { keyword, restype } => {
                let mut b = select_from(ds_name, TableKind::Primary, "id, type_", id_only);
                b.push(" WHERE lcstate<>'RETIRED' AND ");
                b.push_param(keyword.as_str());
                b.push(" = ANY(json_keywords(doc))");
                if let Some(restype) = restype {
                    b.push(" AND type_=");
                    b.push_param(restype.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceSlim, id_only)
            }
            View::ResourceByNestedType {
                nested_type,
                restype,
            } => {
                let mut b = select_from(ds_name, TableKind::Primary, "id, type_", id_only);
                b.push(" WHERE lcstate<>'RETIRED' AND ");
                b.push_param(nested_type.as_str());
                b.push(" = ANY(json_nested(doc))");
                if let Some(restype) = restype {
                    b.push(" AND type_=");
                    b.push_param(restype.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceSlim, id_only)
            }
            View::ResourceByAttribute {
                attr_name,
                attr_value,
                restype,
            } => {
                let mut b = select_from(ds_name, TableKind::Primary, "id, type_", id_only);
                match attr_value {
                    Some(value) => {
                        b.push(" WHERE lcstate<>'RETIRED' AND json_specialattr(doc)=");
                        b.push_param(format!("{attr_name}={value}"));
                    }
                    None => {
                        b.push(" WHERE lcstate<>'RETIRED' AND json_specialattr(doc) LIKE ");
                        b.push_param(format!("{attr_name}=%"));
                    }
                }
                if let Some(restype) = restype {
                    b.push(" AND type_=");
                    b.push_param(restype.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceSlim, id_only)
            }
            View::ResourceByAltId { alt_id, alt_id_ns } => {
                let mut b = SqlBuilder::new();
                b.push("SELECT id, x[1], x[2]");
                if !id_only {
                    b.push(", doc");
                }
                b.push(" FROM (SELECT json_altids(doc) AS x, * FROM ");
                b.push_ident(ds_name);
                b.push(") AS a WHERE lcstate<>'RETIRED'");
                if let Some(alt_id) = alt_id {
                    b.push(" AND x[2]=");
                    b.push_param(alt_id.as_str());
                }
                if let Some(ns) = alt_id_ns {
                    b.push(" AND x[1]=");
                    b.push_param(ns.as_str());
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::ResourceAltId, id_only)
            }
            View::DirByKey {
                org,
                key,
                parent,
                parent_prefix,
            } => {
                let mut b = dir_select(ds_name);
                b.push(" WHERE org=");
                b.push_param(org.as_str());
                if *parent_prefix {
                    b.push(" AND parent LIKE ");
                    b.push_param(format!("{parent}%"));
                } else {
                    b.push(" AND parent=");
                    b.push_param(parent.as_str());
                }
                b.push(" AND key=");
                b.push_param(key.as_str());
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Dir, id_only)
            }
            View::DirByParent { org, parent } => {
                let mut b = dir_select(ds_name);
                b.push(" WHERE org=");
                b.push_param(org.as_str());
                b.push(" AND parent=");
                b.push_param(parent.as_str());
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Dir, id_only)
            }
            View::DirByPath { org, path } => {
                let parent = format!("/{}", path.join("/"));
                let mut b = dir_select(ds_name);
                b.push(" WHERE org=");
                b.push_param(org.as_str());
                b.push(" AND parent LIKE ");
                b.push_param(format!("{parent}%"));
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Dir, id_only)
            }
            View::DirByAttribute {
                org,
                attr_name,
                attr_value,
                parent,
            } => {
                let mut b = dir_select(ds_name);
                b.push(" WHERE org=");
                b.push_param(org.as_str());
                b.push(" AND parent LIKE ");
                b.push_param(format!("{parent}%"));
                b.push(" AND json_string(doc,");
                b.push_param(format!("attributes.{attr_name}"));
                b.push(")=");
                b.push_param(attr_value.as_str());
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Dir, id_only)
            }
            View::EventByOrigin {
                origin,
                start_ts,
                end_ts,
            } => {
                let mut b = event_select(ds_name, id_only);
                b.push(" WHERE origin=");
                b.push_param(origin.as_str());
                event_ts_range(&mut b, start_ts, end_ts);
                event_order(&mut b, &["origin"], filter);
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Event, id_only)
            }
            View::EventByType {
                event_type,
                start_ts,
                end_ts,
            } => {
                let mut b = event_select(ds_name, id_only);
                b.push(" WHERE type_=");
                b.push_param(event_type.as_str());
                event_ts_range(&mut b, start_ts, end_ts);
                event_order(&mut b, &["type_"], filter);
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Event, id_only)
            }
            View::EventByOriginType {
                origin,
                event_type,
                start_ts,
                end_ts,
            } => {
                let mut b = event_select(ds_name, id_only);
                b.push(" WHERE origin=");
                b.push_param(origin.as_str());
                b.push(" AND type_=");
                b.push_param(event_type.as_str());
                event_ts_range(&mut b, start_ts, end_ts);
                event_order(&mut b, &["origin", "type_"], filter);
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Event, id_only)
            }
            View::EventByTime { start_ts, end_ts } => {
                let mut b = event_select(ds_name, id_only);
                match (start_ts, end_ts) {
                    (Some(start), Some(end)) => {
                        b.push(" WHERE ts_created BETWEEN ");
                        b.push_param(start.as_str());
                        b.push(" AND ");
                        b.push_param(end.as_str());
                    }
                    (Some(start), None) => {
                        b.push(" WHERE ts_created>=");
                        b.push_param(start.as_str());
                    }
                    (None, Some(end)) => {
                        b.push(" WHERE ts_created<=");
                        b.push_param(end.as_str());
                    }
                    (None, None) => {}
                }
                event_order(&mut b, &[], filter);
                // an unbounded scan over the event stream is capped
                let limit = match (start_ts, end_ts, filter.limit) {
                    (None, None, None) => Some(100),
                    (_, _, limit) => limit,
                };
                b.push_limit_offset(limit, filter.skip);
                planned(b, RowShape::Event, id_only)
            }
            View::AssocBySubject { ids } => {
                let mut b = assoc_select(ds_name);
                b.push(" AND s IN (");
                push_id_list(&mut b, ids);
                b.push(")");
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Assoc { subject_side: true }, id_only)
            }
            View::AssocByObject { ids } => {
                let mut b = assoc_select(ds_name);
                b.push(" AND o IN (");
                push_id_list(&mut b, ids);
                b.push(")");
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Assoc { subject_side: false }, id_only)
            }
            View::AttachmentByResource { resource_id } => {
                let mut b = SqlBuilder::new();
                b.push("SELECT r.id, r.name, r.type_, r.lcstate, json_keywords(r.doc)");
                if !id_only {
                    b.push(", r.doc");
                }
                b.push(" FROM ");
                b.push_ident(ds_name);
                b.push(" AS r, ");
                b.push_ident(&TableKind::Assoc.table_name(ds_name));
                b.push(" AS a WHERE r.id=a.o AND a.p='hasAttachment'");
                b.push(" AND r.lcstate<>'RETIRED' AND a.retired<>true AND a.s=");
                b.push_param(resource_id.as_str());
                b.push(" ORDER BY r.ts_created");
                if filter.descending {
                    b.push(" DESC");
                }
                b.push_limit_offset(filter.limit, filter.skip);
                planned(b, RowShape::Attachment, id_only)
            }
        }
    }
}

fn planned(b: SqlBuilder, shape: RowShape, id_only: bool) -> PlannedView {
    PlannedView {
        query: b.finish(),
        shape,
        id_only,
    }
}

fn select_from(ds_name: &str, kind: TableKind, columns: &str, id_only: bool) -> SqlBuilder {
    let mut b = SqlBuilder::new();
    b.push("SELECT ");
    b.push(columns);
    if !id_only {
        b.push(", doc");
    }
    b.push(" FROM ");
    b.push_ident(&kind.table_name(ds_name));
    b
}

fn dir_select(ds_name: &str) -> SqlBuilder {
    // directory rows always carry the document
    let mut b = SqlBuilder::new();
    b.push("SELECT id, org, parent, key, doc FROM ");
    b.push_ident(&TableKind::Dir.table_name(ds_name));
    b
}

fn event_select(ds_name: &str, id_only: bool) -> SqlBuilder {
    select_from(ds_name, TableKind::Primary, "id, ts_created", id_only)
}

fn assoc_select(ds_name: &str) -> SqlBuilder {
    let mut b = SqlBuilder::new();
    b.push("SELECT id, s, p, o, doc FROM ");
    b.push_ident(&TableKind::Assoc.table_name(ds_name));
    b.push(" WHERE retired<>true");
    b
}

fn event_ts_range(b: &mut SqlBuilder, start_ts: &Option<String>, end_ts: &Option<String>) {
    if let Some(start) = start_ts {
        b.push(" AND ts_created>=");
        b.push_param(start.as_str());
    }
    if let Some(end) = end_ts {
        b.push(" AND ts_created<=");
        b.push_param(end.as_str());
    }
}

/// Event ordering: the view's indexed columns, then `ts_created` as the
/// tie-break; descending reverses every key.
fn event_order(b: &mut SqlBuilder, cols: &[&str], filter: &ViewFilter) {
    b.push(" ORDER BY ");
    let dir = if filter.descending { " DESC" } else { "" };
    for col in cols {
        b.push(col);
        b.push(dir);
        b.push(", ");
    }
    b.push("ts_created");
    b.push(dir);
}

fn push_id_list(b: &mut SqlBuilder, ids: &[String]) {
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            b.push(",");
        }
        b.push_param(id.as_str());
    }
}

fn bulk_ids(
    design: &str,
    view: &str,
    key: Option<&[String]>,
    keys: Option<&[String]>,
    start: &[String],
) -> Result<Vec<String>> {
    let ids: Vec<String> = keys
        .map(|k| k.to_vec())
        .or_else(|| key.map(|k| k.to_vec()))
        .unwrap_or_else(|| start.to_vec());
    if ids.is_empty() {
        return Err(Error::BadRequest(format!("{design}/{view}: missing ids")));
    }
    Ok(ids)
}

/// Strip dashes so external UUID forms compare equal to stored 32-hex ids.
pub(crate) fn prep_id(id: &str) -> String {
    id.replace('-', "")
}

/// Map a result row into a [`ViewRow`] according to the planned shape.
pub(crate) fn map_row(planned: &PlannedView, row: &tokio_postgres::Row) -> ViewRow {
    let id: String = row.get(0);
    let id = prep_id(&id);
    let opt_str = |i: usize| -> Json {
        row.get::<_, Option<String>>(i)
            .map(Json::String)
            .unwrap_or(Json::Null)
    };
    let doc_at = |i: usize| -> Option<Json> {
        if planned.id_only {
            None
        } else {
            row.get::<_, Option<Json>>(i)
        }
    };

    match planned.shape {
        RowShape::ResourceFull => ViewRow {
            id,
            key: vec![],
            value: json!({"name": opt_str(1), "type_": opt_str(2), "lcstate": opt_str(3)}),
            doc: doc_at(4),
        },
        RowShape::ResourceName => ViewRow {
            id,
            key: vec![],
            value: json!({"name": opt_str(1), "type_": opt_str(2)}),
            doc: doc_at(3),
        },
        RowShape::ResourceSlim => ViewRow {
            id,
            key: vec![],
            value: json!({"type_": opt_str(1)}),
            doc: doc_at(2),
        },
        RowShape::ResourceLcstate => ViewRow {
            id,
            key: vec![],
            value: json!({
                "name": opt_str(1),
                "type_": opt_str(2),
                "lcstate": opt_str(3),
                "availability": opt_str(4),
            }),
            doc: doc_at(5),
        },
        RowShape::ResourceAltId => ViewRow {
            id,
            key: vec![opt_str(1), opt_str(2)],
            value: json!({"alt_id_ns": opt_str(1), "alt_id": opt_str(2)}),
            doc: doc_at(3),
        },
        RowShape::Dir => ViewRow {
            id,
            key: vec![opt_str(1), opt_str(2), opt_str(3)],
            value: Json::Null,
            // the dir projection always carries the document
            doc: row.get::<_, Option<Json>>(4),
        },
        RowShape::Event => ViewRow {
            id,
            key: vec![],
            value: opt_str(1),
            doc: doc_at(2),
        },
        RowShape::Assoc { subject_side } => ViewRow {
            id,
            key: vec![],
            // the opposite end of the traversed edge
            value: if subject_side { opt_str(3) } else { opt_str(1) },
            doc: row.get::<_, Option<Json>>(4),
        },
        RowShape::Attachment => {
            let keywords: Json = row
                .get::<_, Option<Vec<String>>>(4)
                .map(|kws| Json::Array(kws.into_iter().map(Json::String).collect()))
                .unwrap_or(Json::Null);
            ViewRow {
                id,
                key: vec![Json::Null, Json::Null, keywords],
                value: Json::Null,
                doc: doc_at(5),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f() -> ViewFilter {
        ViewFilter::default()
    }

    #[test]
    fn resource_by_type_filters_retired() {
        let v = View::ResourceByType {
            restype: Some("Instrument".into()),
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, name, type_, lcstate FROM "resources" WHERE lcstate<>'RETIRED' AND type_=$1"#
        );
        assert_eq!(p.query.params.len(), 1);
    }

    #[test]
    fn resource_by_type_without_type_scans_all() {
        let v = View::ResourceByType { restype: None };
        let p = v.build("resources", false, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, name, type_, lcstate, doc FROM "resources""#
        );
        assert!(p.query.params.is_empty());
    }

    #[test]
    fn by_lcstate_splits_compound_states() {
        let v = View::resource_by_lcstate("DEPLOYED_AVAILABLE", None);
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, name, type_, lcstate, availability FROM "resources" WHERE lcstate=$1"#
        );
        assert_eq!(
            p.query.params,
            vec![crate::sql::SqlValue::Text("DEPLOYED".into())]
        );
    }

    #[test]
    fn by_lcstate_routes_availability_values() {
        let v = View::resource_by_lcstate("AVAILABLE", Some("Instrument".into()));
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, name, type_, lcstate, availability FROM "resources" WHERE availability=$1 AND type_=$2"#
        );
    }

    #[test]
    fn by_name_matches_exactly() {
        let v = View::ResourceByName {
            name: "probe".into(),
            restype: Some("Instrument".into()),
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, name, type_ FROM "resources" WHERE lcstate<>'RETIRED' AND name=$1 AND type_=$2"#
        );
    }

    #[test]
    fn by_keyword_uses_json_helper() {
        let v = View::ResourceByKeyword {
            keyword: "deep".into(),
            restype: None,
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, type_ FROM "resources" WHERE lcstate<>'RETIRED' AND $1 = ANY(json_keywords(doc))"#
        );
    }

    #[test]
    fn by_attribute_builds_name_value_probe() {
        let v = View::ResourceByAttribute {
            attr_name: "serial".into(),
            attr_value: Some("A-7".into()),
            restype: Some("Instrument".into()),
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, type_ FROM "resources" WHERE lcstate<>'RETIRED' AND json_specialattr(doc)=$1 AND type_=$2"#
        );
        assert_eq!(
            p.query.params[0],
            crate::sql::SqlValue::Text("serial=A-7".into())
        );

        let v = View::ResourceByAttribute {
            attr_name: "serial".into(),
            attr_value: None,
            restype: None,
        };
        let p = v.build("resources", true, &f());
        assert!(p.query.sql.contains("json_specialattr(doc) LIKE $1"));
        assert_eq!(
            p.query.params[0],
            crate::sql::SqlValue::Text("serial=%".into())
        );
    }

    #[test]
    fn by_alt_id_unnests_namespace_and_value() {
        let v = View::ResourceByAltId {
            alt_id: Some("abc".into()),
            alt_id_ns: Some("ns1".into()),
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, x[1], x[2] FROM (SELECT json_altids(doc) AS x, * FROM "resources") AS a WHERE lcstate<>'RETIRED' AND x[2]=$1 AND x[1]=$2"#
        );
    }

    #[test]
    fn dir_by_key_exact_and_prefix() {
        let v = View::DirByKey {
            org: "ion".into(),
            key: "svc1".into(),
            parent: "/services".into(),
            parent_prefix: false,
        };
        let p = v.build("dirstore", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, org, parent, key, doc FROM "dirstore_dir" WHERE org=$1 AND parent=$2 AND key=$3"#
        );

        let v = View::DirByKey {
            org: "ion".into(),
            key: "svc1".into(),
            parent: "/services".into(),
            parent_prefix: true,
        };
        let p = v.build("dirstore", true, &f());
        assert!(p.query.sql.contains("parent LIKE $2"));
        assert_eq!(
            p.query.params[1],
            crate::sql::SqlValue::Text("/services%".into())
        );
    }

    #[test]
    fn dir_by_path_joins_segments_into_prefix() {
        let v = View::DirByPath {
            org: "ion".into(),
            path: vec!["services".into(), "agents".into()],
        };
        let p = v.build("dirstore", true, &f());
        assert_eq!(
            p.query.params[1],
            crate::sql::SqlValue::Text("/services/agents%".into())
        );
    }

    #[test]
    fn dir_by_attribute_resolves_dotted_path() {
        let v = View::DirByAttribute {
            org: "ion".into(),
            attr_name: "owner".into(),
            attr_value: "kai".into(),
            parent: "/services".into(),
        };
        let p = v.build("dirstore", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, org, parent, key, doc FROM "dirstore_dir" WHERE org=$1 AND parent LIKE $2 AND json_string(doc,$3)=$4"#
        );
        assert_eq!(
            p.query.params[2],
            crate::sql::SqlValue::Text("attributes.owner".into())
        );
    }

    #[test]
    fn event_by_origin_orders_by_origin_then_ts() {
        let v = View::EventByOrigin {
            origin: "node-1".into(),
            start_ts: Some("100".into()),
            end_ts: None,
        };
        let p = v.build("events", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, ts_created FROM "events" WHERE origin=$1 AND ts_created>=$2 ORDER BY origin, ts_created"#
        );
    }

    #[test]
    fn event_descending_reverses_every_order_key() {
        let v = View::EventByOriginType {
            origin: "node-1".into(),
            event_type: "StateEvent".into(),
            start_ts: None,
            end_ts: None,
        };
        let p = v.build(
            "events",
            true,
            &ViewFilter {
                descending: true,
                ..Default::default()
            },
        );
        assert!(
            p.query
                .sql
                .ends_with("ORDER BY origin DESC, type_ DESC, ts_created DESC")
        );
    }

    #[test]
    fn event_by_time_unbounded_caps_at_100() {
        let v = View::EventByTime {
            start_ts: None,
            end_ts: None,
        };
        let p = v.build("events", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, ts_created FROM "events" ORDER BY ts_created LIMIT 100"#
        );

        // an explicit limit or either endpoint lifts the default cap
        let p = v.build(
            "events",
            true,
            &ViewFilter {
                limit: Some(5),
                ..Default::default()
            },
        );
        assert!(p.query.sql.ends_with("LIMIT 5"));

        let bounded = View::EventByTime {
            start_ts: Some("100".into()),
            end_ts: Some("200".into()),
        };
        let p = bounded.build("events", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, ts_created FROM "events" WHERE ts_created BETWEEN $1 AND $2 ORDER BY ts_created"#
        );
    }

    #[test]
    fn assoc_views_exclude_retired_edges() {
        let v = View::AssocBySubject {
            ids: vec!["a1".into(), "a2".into()],
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT id, s, p, o, doc FROM "resources_assoc" WHERE retired<>true AND s IN ($1,$2)"#
        );

        let v = View::AssocByObject {
            ids: vec!["b1".into()],
        };
        let p = v.build("resources", true, &f());
        assert!(p.query.sql.contains("o IN ($1)"));
    }

    #[test]
    fn attachment_by_resource_joins_through_has_attachment() {
        let v = View::AttachmentByResource {
            resource_id: "r1".into(),
        };
        let p = v.build("resources", true, &f());
        assert_eq!(
            p.query.sql,
            r#"SELECT r.id, r.name, r.type_, r.lcstate, json_keywords(r.doc) FROM "resources" AS r, "resources_assoc" AS a WHERE r.id=a.o AND a.p='hasAttachment' AND r.lcstate<>'RETIRED' AND a.retired<>true AND a.s=$1 ORDER BY r.ts_created"#
        );
    }

    #[test]
    fn limit_and_skip_append_to_any_view() {
        let v = View::ResourceByType {
            restype: Some("Instrument".into()),
        };
        let p = v.build(
            "resources",
            true,
            &ViewFilter {
                limit: Some(10),
                skip: Some(20),
                descending: false,
            },
        );
        assert!(p.query.sql.ends_with(" LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn parse_resolves_wire_names() {
        let v = View::parse(
            "resource",
            "by_name",
            None,
            None,
            Some(&["probe".into(), "Instrument".into()]),
            None,
        )
        .unwrap();
        assert_eq!(
            v,
            View::ResourceByName {
                name: "probe".into(),
                restype: Some("Instrument".into())
            }
        );

        let v = View::parse(
            "event",
            "by_origin",
            None,
            None,
            Some(&["node-1".into(), "100".into()]),
            Some(&["node-1".into(), "200".into()]),
        )
        .unwrap();
        assert_eq!(
            v,
            View::EventByOrigin {
                origin: "node-1".into(),
                start_ts: Some("100".into()),
                end_ts: Some("200".into())
            }
        );

        assert!(View::parse("resource", "by_magic", None, None, None, None).is_err());
    }

    #[test]
    fn parse_association_bulk_aliases() {
        let v = View::parse(
            "association",
            "by_bulk",
            None,
            Some(&["s1".into(), "s2".into()]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            v,
            View::AssocBySubject {
                ids: vec!["s1".into(), "s2".into()]
            }
        );

        let v = View::parse(
            "association",
            "by_subject_bulk",
            None,
            Some(&["o1".into()]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            v,
            View::AssocByObject {
                ids: vec!["o1".into()]
            }
        );
    }

    #[test]
    fn prep_id_strips_dashes() {
        assert_eq!(
            prep_id("6fa459ea-ee8a-3ca4-894e-db77e160355e"),
            "6fa459eaee8a3ca4894edb77e160355e"
        );
    }
}
