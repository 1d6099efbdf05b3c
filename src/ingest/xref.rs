use rusqlite::{Transaction, params};

use crate::graph::gene::{GeneUpsert, upsert_gene};
use crate::graph::model::{COLLAPSED_EVIDENCE, COLLAPSED_KIND, HierarchyKind, IdSpace, Partition};
use crate::graph::{GraphStore, now_timestamp};
use crate::ingest::annotations::{AnnotationEdge, annotations_in_partition, insert_annotation};
use crate::ingest::hierarchy::{both_terms_exist, insert_edge};
use crate::ingest::{Counters, MISSING_TERMS, UpsertOp};
use crate::source::tables::{CollapsedGeneLink, CollapsedLink};

/// `default` rows of a collapsed table. Each file contributes its own
/// collapsed edge; it is marked cross-validated when a primary relation
/// already joins the pair.
pub struct CollapsedHierarchyUpsert {
    pub partition: Partition,
    pub space: IdSpace,
    pub source_file: String,
}

impl UpsertOp for CollapsedHierarchyUpsert {
    type Record = CollapsedLink;

    fn stage(&self) -> String {
        format!(
            "collapsed_hierarchy:{}:{}",
            self.space.as_str(),
            self.partition.namespace()
        )
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[CollapsedLink],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        let now = now_timestamp();
        let mut primary = tx.prepare_cached(
            "SELECT 1 FROM hierarchy_edges WHERE child = ?1 AND parent = ?2 AND kind <> ?3",
        )?;
        for link in batch {
            if !both_terms_exist(tx, &link.child, &link.parent)? {
                counters.incr(MISSING_TERMS);
                continue;
            }
            let confirmed = primary.exists(params![link.child, link.parent, COLLAPSED_KIND])?;
            let inserted = insert_edge(
                tx,
                &link.child,
                &link.parent,
                &HierarchyKind::Collapsed,
                &self.source_file,
                confirmed,
                &now,
            )?;
            counters.incr(if inserted { "created" } else { "existing" });
            if inserted && confirmed {
                counters.incr("cross_validated");
            }
        }
        Ok(())
    }

    fn resume_count(&self, store: &GraphStore) -> rusqlite::Result<Option<u64>> {
        store
            .count(
                "SELECT COUNT(*) FROM hierarchy_edges h
                 JOIN terms t ON t.id = h.child
                 WHERE h.kind = ?1 AND h.source_file = ?2 AND t.namespace = ?3",
                params![COLLAPSED_KIND, self.source_file, self.partition.namespace()],
            )
            .map(Some)
    }
}

/// `gene` rows of a collapsed table: the gene is keyed in this table's
/// identifier space and linked to the term with collapsed evidence.
pub struct CollapsedGeneUpsert {
    pub partition: Partition,
    pub space: IdSpace,
    pub source_file: String,
    pub imported_at: String,
}

impl UpsertOp for CollapsedGeneUpsert {
    type Record = CollapsedGeneLink;

    fn stage(&self) -> String {
        format!(
            "collapsed_genes:{}:{}",
            self.space.as_str(),
            self.partition.namespace()
        )
    }

    fn apply(
        &self,
        tx: &Transaction<'_>,
        batch: &[CollapsedGeneLink],
        counters: &mut Counters,
    ) -> rusqlite::Result<()> {
        for link in batch {
            if !GraphStore::term_exists(tx, &link.term_id)? {
                counters.incr(MISSING_TERMS);
                continue;
            }
            let gene = GeneUpsert::keyed(self.space, &link.identifier, &self.source_file);
            let outcome = upsert_gene(tx, &gene)?;
            if outcome.created {
                counters.incr("genes_created");
            }
            let inserted = insert_annotation(
                tx,
                &AnnotationEdge {
                    gene_id: outcome.gene_id,
                    term_id: &link.term_id,
                    evidence_code: COLLAPSED_EVIDENCE,
                    qualifier: self.partition.qualifier(),
                    reference: "",
                    assigned_by: "",
                    annotation_date: "",
                    source_file: &self.source_file,
                    imported_at: &self.imported_at,
                },
            )?;
            counters.incr(if inserted { "created" } else { "existing" });
        }
        Ok(())
    }

    fn resume_count(&self, store: &GraphStore) -> rusqlite::Result<Option<u64>> {
        annotations_in_partition(store, &self.source_file, self.partition).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::hierarchy::{StanzaRelationUpsert, stanza_relations_for};
    use crate::ingest::terms::TermUpsert;
    use crate::ingest::{BatchEngine, ResumePolicy};
    use crate::graph::model::RelationKind;
    use crate::source::obo::{ParsedRelation, ParsedTerm};
    use crate::source::reference::EnrichedTerm;

    fn term(id: &str, parent: Option<&str>) -> EnrichedTerm {
        EnrichedTerm {
            term: ParsedTerm {
                id: id.to_string(),
                name: format!("term {id}"),
                namespace: "biological_process".to_string(),
                relations: parent
                    .map(|target| ParsedRelation {
                        kind: RelationKind::IsA,
                        target: target.to_string(),
                        label: None,
                    })
                    .into_iter()
                    .collect(),
                ..ParsedTerm::default()
            },
            reference_validated: false,
            name_corrected: false,
            alt_id_additions: Vec::new(),
        }
    }

    fn seeded_store() -> GraphStore {
        let store = GraphStore::open_in_memory().expect("store");
        let terms = vec![term("GO:1", None), term("GO:2", Some("GO:1")), term("GO:3", None)];
        let engine = BatchEngine::new(&store, 10).with_resume(ResumePolicy::Off);
        engine.run(
            &TermUpsert {
                partition: Partition::BiologicalProcess,
                source_file: "go-basic.obo".to_string(),
                import_timestamp: "t".to_string(),
            },
            &terms,
        );
        engine.run(
            &StanzaRelationUpsert {
                partition: Partition::BiologicalProcess,
                source_file: "go-basic.obo".to_string(),
            },
            &stanza_relations_for(&terms),
        );
        store
    }

    #[test]
    fn collapsed_hierarchy_coexists_with_primary_relation() {
        let store = seeded_store();
        let op = CollapsedHierarchyUpsert {
            partition: Partition::BiologicalProcess,
            space: IdSpace::NumericId,
            source_file: "collapsed_go.entrez".to_string(),
        };
        let links = vec![
            CollapsedLink {
                child: "GO:2".to_string(),
                parent: "GO:1".to_string(),
            },
            CollapsedLink {
                child: "GO:3".to_string(),
                parent: "GO:1".to_string(),
            },
        ];
        let stats = BatchEngine::new(&store, 10)
            .with_resume(ResumePolicy::Off)
            .run(&op, &links);
        assert_eq!(stats.counters.get("created"), 2);
        assert_eq!(stats.counters.get("cross_validated"), 1);

        let edges = store.hierarchy_edges_for_child("GO:2").expect("edges");
        assert_eq!(edges.len(), 2);
        let collapsed = edges
            .iter()
            .find(|edge| edge.kind == HierarchyKind::Collapsed)
            .expect("collapsed edge");
        assert!(collapsed.cross_validated);
        assert_eq!(op.resume_count(&store).expect("count"), Some(2));
    }

    #[test]
    fn gene_rows_key_genes_in_the_table_space() {
        let store = seeded_store();
        let op = CollapsedGeneUpsert {
            partition: Partition::BiologicalProcess,
            space: IdSpace::Symbol,
            source_file: "collapsed_go.symbol".to_string(),
            imported_at: "t".to_string(),
        };
        let links = vec![
            CollapsedGeneLink {
                term_id: "GO:1".to_string(),
                identifier: "TP53".to_string(),
            },
            CollapsedGeneLink {
                term_id: "GO:2".to_string(),
                identifier: "TP53".to_string(),
            },
            CollapsedGeneLink {
                term_id: "GO:404".to_string(),
                identifier: "BRCA1".to_string(),
            },
        ];
        let stats = BatchEngine::new(&store, 10)
            .with_resume(ResumePolicy::Off)
            .run(&op, &links);
        assert_eq!(stats.counters.get("genes_created"), 1);
        assert_eq!(stats.counters.get("created"), 2);
        assert_eq!(stats.counters.get("missing_terms"), 1);

        let genes = store.genes().expect("genes");
        assert_eq!(genes.len(), 1);
        assert_eq!(genes[0].symbol.as_deref(), Some("TP53"));
        assert_eq!(genes[0].id_type, "symbol");
        let annotations = store.annotations_for_gene(genes[0].id).expect("annotations");
        assert!(annotations
            .iter()
            .all(|edge| edge.evidence_code == COLLAPSED_EVIDENCE && edge.qualifier == "involved_in"));
    }
}
