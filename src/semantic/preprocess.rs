//! Content preprocessing for corpus generation.
//!
//! Maps a portfolio content document to the source items that get embedded:
//! 1. One item per project (per category) and per experience entry
//! 2. Text is the non-blank string fields, trimmed, joined with " | "
//! 3. Ids are derived from category/index and a slug of the title

use serde::Deserialize;
use serde_json::{json, Map, Value};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::semantic::types::ItemKind;

/// Separator between the parts of an embedded text
const PART_SEPARATOR: &str = " | ";

/// The subset of the portfolio content document that is searchable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortfolioContent {
    pub project_categories: Vec<ProjectCategory>,
    pub experience_log: Vec<Experience>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectCategory {
    pub id: Option<String>,
    pub name: Option<String>,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub title: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub metrics: Map<String, Value>,
    pub github_url: Option<String>,
    pub project_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Experience {
    pub title: Option<String>,
    pub company: Option<String>,
    pub year: Option<Value>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// An item ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    pub id: String,
    pub kind: ItemKind,
    pub text: String,
    pub meta: Map<String, Value>,
}

/// Lowercase `value`, collapse runs of anything outside `[a-z0-9]` into a
/// single `-`, and strip leading/trailing dashes.
pub fn to_slug(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Characters left as-is in a path segment, matching `encodeURIComponent`.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// `/projects/<category>/<slug>` with each segment percent-encoded.
pub fn project_path(category_id: &str, slug: &str) -> String {
    format!(
        "/projects/{}/{}",
        utf8_percent_encode(category_id, SEGMENT),
        utf8_percent_encode(slug, SEGMENT)
    )
}

/// Trim, drop blanks, join with the part separator.
fn compact_text<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR)
}

fn metric_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn project_to_text(project: &Project, category: &ProjectCategory) -> String {
    let metrics = project
        .metrics
        .iter()
        .map(|(key, value)| format!("{key}: {}", metric_value(value)))
        .collect::<Vec<_>>()
        .join(", ");

    compact_text([
        Some("project"),
        category.name.as_deref(),
        category.id.as_deref(),
        project.title.as_deref(),
        project.status.as_deref(),
        project.description.as_deref(),
        Some(metrics.as_str()),
        project.github_url.as_deref(),
        project.project_url.as_deref(),
    ])
}

fn experience_to_text(experience: &Experience) -> String {
    let tags = experience.tags.join(", ");

    compact_text([
        Some("experience"),
        experience.title.as_deref(),
        experience.company.as_deref(),
        experience.year.as_ref().and_then(Value::as_str),
        experience.description.as_deref(),
        Some(tags.as_str()),
    ])
}

fn opt_value(value: &Option<String>) -> Value {
    value.as_ref().map_or(Value::Null, |v| Value::String(v.clone()))
}

fn into_meta(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .collect(),
        _ => Map::new(),
    }
}

/// All searchable items in `content`: projects first, then experience.
pub fn source_items(content: &PortfolioContent) -> Vec<SourceItem> {
    let projects = content
        .project_categories
        .iter()
        .enumerate()
        .flat_map(|(category_index, category)| {
            let category_key = category
                .id
                .clone()
                .unwrap_or_else(|| category_index.to_string());

            category
                .projects
                .iter()
                .enumerate()
                .map(move |(project_index, project)| {
                    let slug = to_slug(
                        project
                            .title
                            .as_deref()
                            .unwrap_or(&format!("project-{project_index}")),
                    );

                    SourceItem {
                        id: format!("project:{category_key}:{slug}"),
                        kind: ItemKind::Project,
                        text: project_to_text(project, category),
                        meta: into_meta(json!({
                            "title": opt_value(&project.title),
                            "summary": opt_value(&project.description),
                            "categoryId": opt_value(&category.id),
                            "categoryName": opt_value(&category.name),
                            "status": opt_value(&project.status),
                            "path": project_path(&category_key, &slug),
                        })),
                    }
                })
        });

    let experience = content
        .experience_log
        .iter()
        .enumerate()
        .map(|(index, experience)| {
            let slug = to_slug(
                experience
                    .title
                    .as_deref()
                    .unwrap_or(&format!("experience-{index}")),
            );

            SourceItem {
                id: format!("experience:{index}:{slug}"),
                kind: ItemKind::Experience,
                text: experience_to_text(experience),
                meta: into_meta(json!({
                    "title": opt_value(&experience.title),
                    "summary": opt_value(&experience.description),
                    "company": opt_value(&experience.company),
                    "year": experience.year.clone().unwrap_or(Value::Null),
                    "tags": experience.tags,
                })),
            }
        });

    projects.chain(experience).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> PortfolioContent {
        serde_json::from_value(json!({
            "projectCategories": [
                {
                    "id": "web",
                    "name": "Web Apps",
                    "projects": [
                        {
                            "title": "  Folio: Search Engine! ",
                            "status": "live",
                            "description": "Semantic portfolio search",
                            "metrics": {"users": 120, "uptime": "99.9%"},
                            "githubUrl": "https://github.com/me/folio",
                            "projectUrl": "   "
                        },
                        {"description": "untitled"}
                    ]
                },
                {
                    "name": "No Id",
                    "projects": [{"title": "Data Viz"}]
                }
            ],
            "experienceLog": [
                {
                    "title": "Senior Engineer",
                    "company": "Acme",
                    "year": "2021 - 2024",
                    "description": "Built APIs",
                    "tags": ["rust", "go"]
                },
                {"company": "Initech", "year": 2019}
            ],
            "unrelated": {"theme": "dark"}
        }))
        .unwrap()
    }

    #[test]
    fn test_to_slug() {
        assert_eq!(to_slug("  Folio: Search Engine! "), "folio-search-engine");
        assert_eq!(to_slug("--Hello__World--"), "hello-world");
        assert_eq!(to_slug("Café Über 2"), "caf-ber-2");
        assert_eq!(to_slug("!!!"), "");
    }

    #[test]
    fn test_project_path_encodes_segments() {
        assert_eq!(project_path("web", "folio"), "/projects/web/folio");
        assert_eq!(project_path("ml ops", "x"), "/projects/ml%20ops/x");
        assert_eq!(project_path("r&d", "a+b=c"), "/projects/r%26d/a%2Bb%3Dc");
        assert_eq!(project_path("..", "v1.2"), "/projects/../v1.2");
        assert_eq!(project_path("a/b", "it's(1)"), "/projects/a%2Fb/it's(1)");
        assert_eq!(project_path("café", "x"), "/projects/caf%C3%A9/x");
    }

    #[test]
    fn test_project_items() {
        let items = source_items(&content());
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "project:web:folio-search-engine",
                "project:web:project-1",
                "project:1:data-viz",
                "experience:0:senior-engineer",
                "experience:1:experience-1",
            ]
        );

        let folio = &items[0];
        assert_eq!(folio.kind, ItemKind::Project);
        assert_eq!(
            folio.text,
            "project | Web Apps | web | Folio: Search Engine! | live | Semantic portfolio search | users: 120, uptime: 99.9% | https://github.com/me/folio"
        );
        assert_eq!(folio.meta["path"], "/projects/web/folio-search-engine");
        assert_eq!(folio.meta["categoryName"], "Web Apps");
        assert_eq!(folio.meta["summary"], "Semantic portfolio search");

        let untitled = &items[1];
        assert_eq!(untitled.text, "project | Web Apps | web | untitled");
        assert!(!untitled.meta.contains_key("title"));

        assert_eq!(items[2].meta["path"], "/projects/1/data-viz");
        assert!(!items[2].meta.contains_key("categoryId"));
    }

    #[test]
    fn test_experience_items() {
        let items = source_items(&content());

        let engineer = &items[3];
        assert_eq!(engineer.kind, ItemKind::Experience);
        assert_eq!(
            engineer.text,
            "experience | Senior Engineer | Acme | 2021 - 2024 | Built APIs | rust, go"
        );
        assert_eq!(engineer.meta["tags"], json!(["rust", "go"]));

        // numeric years are kept in meta but not embedded
        let initech = &items[4];
        assert_eq!(initech.text, "experience | Initech");
        assert_eq!(initech.meta["year"], 2019);
        assert_eq!(initech.meta["tags"], json!([]));
    }

    #[test]
    fn test_empty_document() {
        let content: PortfolioContent = serde_json::from_value(json!({})).unwrap();
        assert!(source_items(&content).is_empty());
    }
}
