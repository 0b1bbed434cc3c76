//! The object façade: typed records at the datastore boundary.
//!
//! Records serialize to JSON document bodies carrying `type_` before they
//! reach the base store, and rehydrate through the type registry on the
//! way out. The finder family traverses associations and the resource
//! views without the caller touching SQL.

use std::sync::Arc;

use serde_json::Value as Json;
use silt_wire::{TypeRegistry, TypedRecord, WireValue};
use tracing::debug;

use crate::error::{Error, Result};
use crate::profile::TableKind;
use crate::sql::SqlBuilder;
use crate::store::{AttachmentData, Datastore, Doc, DocKind, DocRef};
use crate::views::{View, ViewFilter, prep_id};

/// Finder results: ids or full records, depending on `id_only`.
#[derive(Debug)]
pub enum Found {
    Ids(Vec<String>),
    Records(Vec<TypedRecord>),
}

impl Found {
    pub fn len(&self) -> usize {
        match self {
            Found::Ids(v) => v.len(),
            Found::Records(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ids, when this result carries ids.
    pub fn ids(&self) -> Option<&[String]> {
        match self {
            Found::Ids(v) => Some(v),
            Found::Records(_) => None,
        }
    }

    pub fn records(&self) -> Option<&[TypedRecord]> {
        match self {
            Found::Ids(_) => None,
            Found::Records(v) => Some(v),
        }
    }
}

/// The `anyside` argument of [`ObjectStore::find_associations`]: match
/// either end of an edge.
#[derive(Debug, Clone)]
pub enum AnySide {
    /// One id; may be combined with a predicate.
    Id(String),
    /// Several ids, OR-combined.
    Ids(Vec<String>),
    /// `(id, predicate)` pairs, OR-combined.
    IdPredicates(Vec<(String, String)>),
}

/// Inputs of [`ObjectStore::find_resources_ext`]. The populated fields
/// select which view runs; see the dispatch order there.
#[derive(Debug, Clone, Default)]
pub struct ResourceQuery {
    pub restype: Option<String>,
    pub lcstate: Option<String>,
    pub name: Option<String>,
    pub keyword: Option<String>,
    pub nested_type: Option<String>,
    pub attr_name: Option<String>,
    pub attr_value: Option<String>,
    pub alt_id: Option<String>,
    pub alt_id_ns: Option<String>,
}

/// Typed-record layer over a [`Datastore`].
pub struct ObjectStore {
    store: Datastore,
    registry: Arc<TypeRegistry>,
}

impl ObjectStore {
    pub fn new(store: Datastore, registry: Arc<TypeRegistry>) -> Self {
        ObjectStore { store, registry }
    }

    /// The underlying raw document store.
    pub fn store(&self) -> &Datastore {
        &self.store
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn record_to_doc(&self, record: &TypedRecord) -> Result<Doc> {
        match WireValue::Record(record.clone()).to_json()? {
            Json::Object(m) => Ok(m),
            _ => Err(Error::BadRequest("record did not serialize to a map".into())),
        }
    }

    fn json_to_record(&self, json: Json) -> Result<TypedRecord> {
        match WireValue::from_json(&json, &self.registry)? {
            WireValue::Record(rec) => Ok(rec),
            _ => Err(Error::BadRequest("document carries no type_ tag".into())),
        }
    }

    fn doc_to_record(&self, doc: Doc) -> Result<TypedRecord> {
        self.json_to_record(Json::Object(doc))
    }

    // -------------------------------------------------------------------
    // CRUD over typed records

    pub async fn create(
        &self,
        record: &TypedRecord,
        object_id: Option<&str>,
        attachments: Option<Vec<(String, AttachmentData)>>,
    ) -> Result<(String, String)> {
        let doc = self.record_to_doc(record)?;
        self.store.create_doc(doc, object_id, attachments).await
    }

    pub async fn create_mult(
        &self,
        records: &[TypedRecord],
        object_ids: Option<Vec<String>>,
    ) -> Result<Vec<(bool, String, String)>> {
        let docs = records
            .iter()
            .map(|r| self.record_to_doc(r))
            .collect::<Result<Vec<_>>>()?;
        self.store.create_doc_mult(docs, object_ids).await
    }

    pub async fn read(&self, object_id: &str, kind: Option<DocKind>) -> Result<TypedRecord> {
        let doc = self.store.read_doc(object_id, kind).await?;
        self.doc_to_record(doc)
    }

    pub async fn read_mult(&self, object_ids: &[String]) -> Result<Vec<Option<TypedRecord>>> {
        let docs = self.store.read_doc_mult(object_ids, None).await?;
        docs.into_iter()
            .map(|d| d.map(|doc| self.doc_to_record(doc)).transpose())
            .collect()
    }

    pub async fn update(&self, record: &TypedRecord) -> Result<(String, String)> {
        let doc = self.record_to_doc(record)?;
        self.store.update_doc(doc).await
    }

    pub async fn update_mult(
        &self,
        records: &[TypedRecord],
    ) -> Result<Vec<(bool, String, String)>> {
        let docs = records
            .iter()
            .map(|r| self.record_to_doc(r))
            .collect::<Result<Vec<_>>>()?;
        self.store.update_doc_mult(docs).await
    }

    pub async fn delete(&self, object_id: &str, kind: Option<DocKind>) -> Result<()> {
        self.store.delete_doc(object_id, kind).await
    }

    pub async fn delete_mult(&self, object_ids: &[String], kind: Option<DocKind>) -> Result<()> {
        self.store.delete_doc_mult(object_ids, kind).await
    }

    pub async fn create_attachment(
        &self,
        doc: DocRef<'_>,
        name: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<()> {
        self.store
            .create_attachment(doc, name, data, content_type)
            .await
    }

    // -------------------------------------------------------------------
    // Association traversal

    /// Objects reachable from a subject, with the traversed associations.
    pub async fn find_objects(
        &self,
        subject: &str,
        predicate: Option<&str>,
        object_type: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<TypedRecord>)> {
        if subject.is_empty() {
            return Err(Error::BadRequest("must provide subject".into()));
        }
        if object_type.is_some() && predicate.is_none() {
            return Err(Error::BadRequest(
                "cannot provide object type without a predicate".into(),
            ));
        }
        self.traverse(subject, predicate, object_type, id_only, filter, true)
            .await
    }

    /// Subjects pointing at an object; mirror of [`find_objects`](Self::find_objects).
    pub async fn find_subjects(
        &self,
        object: &str,
        predicate: Option<&str>,
        subject_type: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<TypedRecord>)> {
        if object.is_empty() {
            return Err(Error::BadRequest("must provide object".into()));
        }
        if subject_type.is_some() && predicate.is_none() {
            return Err(Error::BadRequest(
                "cannot provide subject type without a predicate".into(),
            ));
        }
        self.traverse(object, predicate, subject_type, id_only, filter, false)
            .await
    }

    /// Shared edge traversal. `forward` walks subject→object.
    async fn traverse(
        &self,
        anchor: &str,
        predicate: Option<&str>,
        far_type: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
        forward: bool,
    ) -> Result<(Found, Vec<TypedRecord>)> {
        let ds = self.store.resolve_name(None)?;
        let assoc = TableKind::Assoc.table_name(&ds);
        let (near_col, far_col, type_col) = if forward {
            ("s", "o", "ot")
        } else {
            ("o", "s", "st")
        };

        let mut b = SqlBuilder::new();
        if id_only {
            b.push("SELECT ");
            b.push(far_col);
            b.push(", doc FROM ");
            b.push_ident(&assoc);
            b.push(" WHERE retired<>true");
        } else {
            b.push("SELECT ");
            b.push_ident(&ds);
            b.push(".doc, ");
            b.push_ident(&assoc);
            b.push(".doc FROM ");
            b.push_ident(&assoc);
            b.push(", ");
            b.push_ident(&ds);
            b.push(" WHERE retired<>true AND ");
            b.push_ident(&assoc);
            b.push(".");
            b.push(far_col);
            b.push("=");
            b.push_ident(&ds);
            b.push(".id");
        }
        b.push(" AND ");
        b.push(near_col);
        b.push("=");
        b.push_param(anchor);
        if let Some(p) = predicate {
            b.push(" AND p=");
            b.push_param(p);
            if let Some(t) = far_type {
                b.push(" AND ");
                b.push(type_col);
                b.push("=");
                b.push_param(t);
            }
        }
        b.push_limit_offset(filter.limit, filter.skip);

        let rows = self.store.query_built(&b.finish()).await?;
        let assocs = rows
            .iter()
            .map(|r| self.json_to_record(r.get::<_, Json>(1)))
            .collect::<Result<Vec<_>>>()?;
        debug!(found = assocs.len(), forward, "association traversal");

        if id_only {
            let ids = rows
                .iter()
                .map(|r| prep_id(&r.get::<_, String>(0)))
                .collect();
            Ok((Found::Ids(ids), assocs))
        } else {
            let objs = rows
                .iter()
                .map(|r| self.json_to_record(r.get::<_, Json>(0)))
                .collect::<Result<Vec<_>>>()?;
            Ok((Found::Records(objs), assocs))
        }
    }

    /// Find associations by any subset of subject, object, predicate, or
    /// either-side ids.
    pub async fn find_associations(
        &self,
        subject: Option<&str>,
        object: Option<&str>,
        predicate: Option<&str>,
        anyside: Option<&AnySide>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<Found> {
        if subject.is_none() && object.is_none() && predicate.is_none() && anyside.is_none() {
            return Err(Error::BadRequest(
                "no subject/predicate/object or anyside".into(),
            ));
        }
        if anyside.is_some() && (subject.is_some() || object.is_some()) {
            return Err(Error::BadRequest(
                "anyside cannot be combined with subject/object".into(),
            ));
        }
        if matches!(anyside, Some(AnySide::Ids(_) | AnySide::IdPredicates(_)))
            && predicate.is_some()
        {
            return Err(Error::BadRequest(
                "anyside list cannot be combined with predicate".into(),
            ));
        }
        debug!(?subject, ?object, ?predicate, "find_associations");

        let ds = self.store.resolve_name(None)?;
        let mut b = SqlBuilder::new();
        if id_only {
            b.push("SELECT id FROM ");
        } else {
            b.push("SELECT id, doc, s, st, p, o, ot FROM ");
        }
        b.push_ident(&TableKind::Assoc.table_name(&ds));
        b.push(" WHERE ");

        match (subject, object, anyside) {
            (Some(s), Some(o), _) => {
                b.push("s=");
                b.push_param(s);
                b.push(" AND o=");
                b.push_param(o);
                if let Some(p) = predicate {
                    b.push(" AND p=");
                    b.push_param(p);
                }
            }
            (Some(s), None, _) => {
                b.push("s=");
                b.push_param(s);
                if let Some(p) = predicate {
                    b.push(" AND p=");
                    b.push_param(p);
                }
            }
            (None, Some(o), _) => {
                b.push("o=");
                b.push_param(o);
                if let Some(p) = predicate {
                    b.push(" AND p=");
                    b.push_param(p);
                }
            }
            (None, None, Some(AnySide::Id(id))) => {
                if let Some(p) = predicate {
                    b.push("p=");
                    b.push_param(p);
                    b.push(" AND (s=");
                    b.push_param(id.as_str());
                    b.push(" OR o=");
                    b.push_param(id.as_str());
                    b.push(")");
                } else {
                    b.push("(s=");
                    b.push_param(id.as_str());
                    b.push(" OR o=");
                    b.push_param(id.as_str());
                    b.push(")");
                }
            }
            (None, None, Some(AnySide::Ids(ids))) => {
                if ids.is_empty() {
                    return Err(Error::BadRequest("anyside ids must not be empty".into()));
                }
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        b.push(" OR ");
                    }
                    b.push("(s=");
                    b.push_param(id.as_str());
                    b.push(" OR o=");
                    b.push_param(id.as_str());
                    b.push(")");
                }
            }
            (None, None, Some(AnySide::IdPredicates(pairs))) => {
                if pairs.is_empty() {
                    return Err(Error::BadRequest("anyside pairs must not be empty".into()));
                }
                for (i, (id, pred)) in pairs.iter().enumerate() {
                    if i > 0 {
                        b.push(" OR ");
                    }
                    b.push("(p=");
                    b.push_param(pred.as_str());
                    b.push(" AND (s=");
                    b.push_param(id.as_str());
                    b.push(" OR o=");
                    b.push_param(id.as_str());
                    b.push("))");
                }
            }
            (None, None, None) => {
                // predicate-only; guarded non-empty above
                b.push("p=");
                b.push_param(predicate.unwrap_or_default());
            }
        }
        b.push_limit_offset(filter.limit, filter.skip);

        let rows = self.store.query_built(&b.finish()).await?;
        debug!(found = rows.len(), "find_associations results");
        if id_only {
            Ok(Found::Ids(
                rows.iter()
                    .map(|r| prep_id(&r.get::<_, String>(0)))
                    .collect(),
            ))
        } else {
            let records = rows
                .iter()
                .map(|r| self.json_to_record(r.get::<_, Json>(1)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Found::Records(records))
        }
    }

    /// Associations for a list of subjects, via the bulk view.
    pub async fn find_objects_mult(
        &self,
        subjects: &[String],
        id_only: bool,
    ) -> Result<(Found, Vec<TypedRecord>)> {
        let view = View::AssocBySubject {
            ids: subjects.to_vec(),
        };
        self.bulk_traverse(view, id_only).await
    }

    /// Associations for a list of objects, via the bulk view.
    pub async fn find_subjects_mult(
        &self,
        objects: &[String],
        id_only: bool,
    ) -> Result<(Found, Vec<TypedRecord>)> {
        let view = View::AssocByObject {
            ids: objects.to_vec(),
        };
        self.bulk_traverse(view, id_only).await
    }

    async fn bulk_traverse(
        &self,
        view: View,
        id_only: bool,
    ) -> Result<(Found, Vec<TypedRecord>)> {
        let rows = self
            .store
            .find_docs_by_view(&view, false, &ViewFilter::default())
            .await?;
        let ids: Vec<String> = rows
            .iter()
            .filter_map(|r| r.value.as_str().map(|s| prep_id(s)))
            .collect();
        let assocs = rows
            .iter()
            .filter_map(|r| r.doc.clone())
            .map(|d| self.json_to_record(d))
            .collect::<Result<Vec<_>>>()?;
        if id_only {
            Ok((Found::Ids(ids), assocs))
        } else {
            let records = self
                .read_mult(&ids)
                .await?
                .into_iter()
                .flatten()
                .collect();
            Ok((Found::Records(records), assocs))
        }
    }

    // -------------------------------------------------------------------
    // Resource finders

    pub async fn find_resources(
        &self,
        restype: Option<&str>,
        lcstate: Option<&str>,
        name: Option<&str>,
        id_only: bool,
    ) -> Result<(Found, Vec<Json>)> {
        let query = ResourceQuery {
            restype: restype.map(Into::into),
            lcstate: lcstate.map(Into::into),
            name: name.map(Into::into),
            ..Default::default()
        };
        self.find_resources_ext(&query, &ViewFilter::default(), id_only)
            .await
    }

    /// Dispatch a resource query to the matching view.
    ///
    /// Returns the found resources plus one light projection per row (id
    /// and the view's indexed columns).
    pub async fn find_resources_ext(
        &self,
        query: &ResourceQuery,
        filter: &ViewFilter,
        id_only: bool,
    ) -> Result<(Found, Vec<Json>)> {
        let q = query;
        if let Some(name) = &q.name {
            if q.lcstate.is_some() {
                return Err(Error::BadRequest(
                    "find by name does not support lcstate".into(),
                ));
            }
            return self
                .find_res_by_name(name, q.restype.as_deref(), id_only, filter)
                .await;
        }
        if let Some(keyword) = &q.keyword {
            return self
                .find_res_by_keyword(keyword, q.restype.as_deref(), id_only, filter)
                .await;
        }
        if q.alt_id.is_some() || q.alt_id_ns.is_some() {
            return self
                .find_res_by_alt_id(q.alt_id.as_deref(), q.alt_id_ns.as_deref(), id_only, filter)
                .await;
        }
        if let Some(nested) = &q.nested_type {
            return self
                .find_res_by_nested_type(nested, q.restype.as_deref(), id_only, filter)
                .await;
        }
        if let (Some(restype), Some(attr_name)) = (&q.restype, &q.attr_name) {
            return self
                .find_res_by_attribute(
                    Some(restype),
                    attr_name,
                    q.attr_value.as_deref(),
                    id_only,
                    filter,
                )
                .await;
        }
        if let Some(lcstate) = &q.lcstate {
            return self
                .find_res_by_lcstate(lcstate, q.restype.as_deref(), id_only, filter)
                .await;
        }
        self.find_res_by_type(q.restype.as_deref(), id_only, filter)
            .await
    }

    pub async fn find_res_by_type(
        &self,
        restype: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        let view = View::ResourceByType {
            restype: restype.map(Into::into),
        };
        self.run_resource_view(view, id_only, filter).await
    }

    pub async fn find_res_by_lcstate(
        &self,
        lcstate: &str,
        restype: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        let view = View::resource_by_lcstate(lcstate, restype.map(Into::into));
        self.run_resource_view(view, id_only, filter).await
    }

    pub async fn find_res_by_name(
        &self,
        name: &str,
        restype: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        let view = View::ResourceByName {
            name: name.to_owned(),
            restype: restype.map(Into::into),
        };
        self.run_resource_view(view, id_only, filter).await
    }

    pub async fn find_res_by_keyword(
        &self,
        keyword: &str,
        restype: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        if keyword.is_empty() {
            return Err(Error::BadRequest("argument keyword illegal".into()));
        }
        let view = View::ResourceByKeyword {
            keyword: keyword.to_owned(),
            restype: restype.map(Into::into),
        };
        self.run_resource_view(view, id_only, filter).await
    }

    pub async fn find_res_by_nested_type(
        &self,
        nested_type: &str,
        restype: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        if nested_type.is_empty() {
            return Err(Error::BadRequest("argument nested_type illegal".into()));
        }
        let view = View::ResourceByNestedType {
            nested_type: nested_type.to_owned(),
            restype: restype.map(Into::into),
        };
        self.run_resource_view(view, id_only, filter).await
    }

    pub async fn find_res_by_attribute(
        &self,
        restype: Option<&str>,
        attr_name: &str,
        attr_value: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        if attr_name.is_empty() {
            return Err(Error::BadRequest("argument attr_name illegal".into()));
        }
        let view = View::ResourceByAttribute {
            attr_name: attr_name.to_owned(),
            attr_value: attr_value.map(Into::into),
            restype: restype.map(Into::into),
        };
        self.run_resource_view(view, id_only, filter).await
    }

    pub async fn find_res_by_alt_id(
        &self,
        alt_id: Option<&str>,
        alt_id_ns: Option<&str>,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        let view = View::ResourceByAltId {
            alt_id: alt_id.map(Into::into),
            alt_id_ns: alt_id_ns.map(Into::into),
        };
        self.run_resource_view(view, id_only, filter).await
    }

    async fn run_resource_view(
        &self,
        view: View,
        id_only: bool,
        filter: &ViewFilter,
    ) -> Result<(Found, Vec<Json>)> {
        let rows = self.store.find_docs_by_view(&view, id_only, filter).await?;

        let res_assocs: Vec<Json> = rows
            .iter()
            .map(|r| {
                let mut value = r.value.clone();
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("id".into(), Json::String(r.id.clone()));
                }
                value
            })
            .collect();

        if id_only {
            Ok((
                Found::Ids(rows.into_iter().map(|r| r.id).collect()),
                res_assocs,
            ))
        } else {
            let records = rows
                .into_iter()
                .filter_map(|r| r.doc)
                .map(|d| self.json_to_record(d))
                .collect::<Result<Vec<_>>>()?;
            Ok((Found::Records(records), res_assocs))
        }
    }
}
