use std::io::{self, BufRead};

use serde::Serialize;

use crate::graph::model::{Partition, RelationKind, Synonym, SynonymScope};

const TERM_STANZA: &str = "[Term]";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ParsedTerm {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub definition: Option<String>,
    pub definition_refs: Vec<String>,
    pub is_obsolete: bool,
    pub synonyms: Vec<Synonym>,
    pub alt_ids: Vec<String>,
    pub xrefs: Vec<String>,
    pub subsets: Vec<String>,
    pub comment: Option<String>,
    pub replaced_by: Vec<String>,
    pub consider: Vec<String>,
    pub created_by: Option<String>,
    pub creation_date: Option<String>,
    pub relations: Vec<ParsedRelation>,
}

/// `is_a` or `relationship` line. The label after `!` is commentary only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedRelation {
    pub kind: RelationKind,
    pub target: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineErrorKind {
    MissingSeparator,
    MalformedQuotedValue,
    MalformedRelationship,
    EmptyTarget,
    InvalidBoolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineError {
    pub line: usize,
    pub kind: LineErrorKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ParseStats {
    pub stanzas_seen: u64,
    pub terms_emitted: u64,
    pub skipped_other_namespace: u64,
    pub line_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParseOutput {
    pub terms: Vec<ParsedTerm>,
    pub stats: ParseStats,
    pub errors: Vec<LineError>,
}

struct Stanza {
    is_term: bool,
    skip: bool,
    term: ParsedTerm,
}

/// Parses `[Term]` stanzas, keeping only those whose namespace is `target`.
///
/// Once a stanza's namespace is known to differ from the target, its remaining
/// lines are not parsed. The emitted set is the same as a full parse followed
/// by a namespace filter.
pub fn parse_stanzas<R: BufRead>(reader: R, target: Partition) -> io::Result<ParseOutput> {
    let mut out = ParseOutput::default();
    let mut current: Option<Stanza> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('!') {
            continue;
        }

        if is_stanza_header(trimmed) {
            if let Some(stanza) = current.take() {
                emit(&mut out, stanza, target);
            }
            let is_term = trimmed == TERM_STANZA;
            if is_term {
                out.stats.stanzas_seen += 1;
            }
            current = Some(Stanza {
                is_term,
                skip: false,
                term: ParsedTerm::default(),
            });
            continue;
        }

        let Some(stanza) = current.as_mut() else {
            continue;
        };
        if !stanza.is_term || stanza.skip {
            continue;
        }

        if let Err(kind) = apply_line(stanza, trimmed, target) {
            out.stats.line_errors += 1;
            out.errors.push(LineError {
                line: idx + 1,
                kind,
                text: trimmed.to_string(),
            });
        }
    }

    if let Some(stanza) = current.take() {
        emit(&mut out, stanza, target);
    }
    Ok(out)
}

fn is_stanza_header(line: &str) -> bool {
    line.len() > 2 && line.starts_with('[') && line.ends_with(']') && !line[1..].contains('[')
}

fn emit(out: &mut ParseOutput, stanza: Stanza, target: Partition) {
    if !stanza.is_term {
        return;
    }
    if stanza.skip {
        out.stats.skipped_other_namespace += 1;
        return;
    }
    if stanza.term.id.is_empty() || stanza.term.namespace != target.namespace() {
        return;
    }
    out.stats.terms_emitted += 1;
    out.terms.push(stanza.term);
}

fn apply_line(stanza: &mut Stanza, line: &str, target: Partition) -> Result<(), LineErrorKind> {
    let (key, value) = line
        .split_once(':')
        .ok_or(LineErrorKind::MissingSeparator)?;
    let value = value.trim();
    let term = &mut stanza.term;

    match key.trim() {
        "id" => term.id = value.to_string(),
        "name" => term.name = value.to_string(),
        "namespace" => {
            term.namespace = value.to_string();
            if value != target.namespace() {
                stanza.skip = true;
            }
        }
        "def" => {
            let (text, rest) = split_quoted(value).ok_or(LineErrorKind::MalformedQuotedValue)?;
            term.definition = Some(text);
            term.definition_refs = parse_ref_list(rest);
        }
        "synonym" => term.synonyms.push(parse_synonym(value)?),
        "is_a" => {
            let (target, label) = split_commentary(value);
            let target = first_token(target).ok_or(LineErrorKind::EmptyTarget)?;
            term.relations.push(ParsedRelation {
                kind: RelationKind::IsA,
                target: target.to_string(),
                label,
            });
        }
        "relationship" => {
            let (body, label) = split_commentary(value);
            let mut tokens = body.split_whitespace();
            let (Some(kind), Some(target)) = (tokens.next(), tokens.next()) else {
                return Err(LineErrorKind::MalformedRelationship);
            };
            term.relations.push(ParsedRelation {
                kind: RelationKind::from_label(kind),
                target: target.to_string(),
                label,
            });
        }
        "is_obsolete" => {
            term.is_obsolete = match value {
                "true" => true,
                "false" => false,
                _ => return Err(LineErrorKind::InvalidBoolean),
            };
        }
        "alt_id" => push_token(&mut term.alt_ids, value),
        "replaced_by" => push_token(&mut term.replaced_by, value),
        "consider" => push_token(&mut term.consider, value),
        "xref" => push_token(&mut term.xrefs, value),
        "subset" => push_token(&mut term.subsets, value),
        "comment" => term.comment = Some(value.to_string()),
        "created_by" => term.created_by = Some(value.to_string()),
        "creation_date" => term.creation_date = Some(value.to_string()),
        _ => {}
    }
    Ok(())
}

fn push_token(values: &mut Vec<String>, raw: &str) {
    if let Some(token) = first_token(raw) {
        values.push(token.to_string());
    }
}

fn first_token(raw: &str) -> Option<&str> {
    raw.split_whitespace().next()
}

/// Splits `body ! label` into the body and the trimmed label.
fn split_commentary(value: &str) -> (&str, Option<String>) {
    match value.split_once('!') {
        Some((body, label)) => {
            let label = label.trim();
            (body.trim(), (!label.is_empty()).then(|| label.to_string()))
        }
        None => (value.trim(), None),
    }
}

/// Reads a leading `"..."` value with `\"` escapes; returns the text and the remainder.
fn split_quoted(value: &str) -> Option<(String, &str)> {
    let body = value.strip_prefix('"')?;
    let mut text = String::new();
    let mut escaped = false;
    for (offset, ch) in body.char_indices() {
        if escaped {
            text.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            return Some((text, &body[offset + 1..]));
        } else {
            text.push(ch);
        }
    }
    None
}

fn parse_ref_list(rest: &str) -> Vec<String> {
    let Some(start) = rest.find('[') else {
        return Vec::new();
    };
    let Some(end) = rest[start..].find(']') else {
        return Vec::new();
    };
    rest[start + 1..start + end]
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_synonym(value: &str) -> Result<Synonym, LineErrorKind> {
    let (text, rest) = split_quoted(value).ok_or(LineErrorKind::MalformedQuotedValue)?;
    let scope = rest
        .split('[')
        .next()
        .and_then(|head| head.split_whitespace().next())
        .and_then(SynonymScope::from_token)
        .unwrap_or(SynonymScope::Related);
    Ok(Synonym {
        text,
        scope,
        refs: parse_ref_list(rest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"format-version: 1.2
ontology: go

[Term]
id: GO:0000001
name: mitochondrion inheritance
namespace: biological_process
def: "The distribution of \"mitochondria\" into daughter cells." [GOC:mcc, PMID:10873824]
synonym: "mitochondrial inheritance" EXACT []
synonym: "organelle inheritance" [GOC:x]
is_a: GO:0048308 ! organelle inheritance
relationship: part_of GO:0007005 ! mitochondrion organization
alt_id: GO:0000999

[Term]
id: GO:0000015
name: phosphopyruvate hydratase complex
namespace: cellular_component
is_a: GO:1902494 ! catalytic complex

[Term]
id: GO:0000002
name: mitochondrial genome maintenance
namespace: biological_process
relationship: occurs_in GO:0005739 ! mitochondrion
is_obsolete: false

[Typedef]
id: part_of
name: part of
namespace: biological_process
"#;

    #[test]
    fn keeps_only_target_partition_stanzas() {
        let out = parse_stanzas(SAMPLE.as_bytes(), Partition::BiologicalProcess).expect("parse");
        let ids = out.terms.iter().map(|term| term.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["GO:0000001", "GO:0000002"]);
        assert_eq!(out.stats.stanzas_seen, 3);
        assert_eq!(out.stats.terms_emitted, 2);
        assert_eq!(out.stats.skipped_other_namespace, 1);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn parses_definition_synonyms_and_relations() {
        let out = parse_stanzas(SAMPLE.as_bytes(), Partition::BiologicalProcess).expect("parse");
        let term = &out.terms[0];
        assert_eq!(
            term.definition.as_deref(),
            Some("The distribution of \"mitochondria\" into daughter cells.")
        );
        assert_eq!(term.definition_refs, vec!["GOC:mcc", "PMID:10873824"]);
        assert_eq!(term.synonyms[0].scope, SynonymScope::Exact);
        assert_eq!(term.synonyms[1].scope, SynonymScope::Related);
        assert_eq!(term.synonyms[1].refs, vec!["GOC:x"]);
        assert_eq!(term.alt_ids, vec!["GO:0000999"]);
        assert_eq!(
            term.relations[0],
            ParsedRelation {
                kind: RelationKind::IsA,
                target: "GO:0048308".to_string(),
                label: Some("organelle inheritance".to_string()),
            }
        );
        assert_eq!(term.relations[1].kind, RelationKind::PartOf);

        let other = &out.terms[1].relations[0];
        assert_eq!(other.kind, RelationKind::Other("occurs_in".to_string()));
        assert_eq!(other.target, "GO:0005739");
    }

    #[test]
    fn malformed_lines_are_counted_and_skipped() {
        let input = "[Term]\nid: GO:1\nname: broken\nnamespace: molecular_function\ndef: no quotes here\nrelationship: part_of\ngarbage line\nis_obsolete: maybe\n";
        let out = parse_stanzas(input.as_bytes(), Partition::MolecularFunction).expect("parse");
        assert_eq!(out.terms.len(), 1);
        assert_eq!(out.terms[0].name, "broken");
        let kinds = out.errors.iter().map(|err| err.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                LineErrorKind::MalformedQuotedValue,
                LineErrorKind::MalformedRelationship,
                LineErrorKind::MissingSeparator,
                LineErrorKind::InvalidBoolean,
            ]
        );
        assert_eq!(out.errors[0].line, 5);
        assert_eq!(out.stats.line_errors, 4);
    }

    #[test]
    fn stanza_without_namespace_or_id_is_not_emitted() {
        let input = "[Term]\nid: GO:1\nname: no namespace\n\n[Term]\nname: no id\nnamespace: biological_process\n";
        let out = parse_stanzas(input.as_bytes(), Partition::BiologicalProcess).expect("parse");
        assert!(out.terms.is_empty());
    }

    #[test]
    fn skipping_matches_full_parse_then_filter() {
        let input = "[Term]\nid: GO:2\nnamespace: cellular_component\nsynonym: broken\nname: late name\n\n[Term]\nid: GO:3\nname: kept\nnamespace: biological_process\n";
        let out = parse_stanzas(input.as_bytes(), Partition::BiologicalProcess).expect("parse");
        assert_eq!(out.terms.len(), 1);
        assert_eq!(out.terms[0].id, "GO:3");
        assert!(out.errors.is_empty());
    }
}
