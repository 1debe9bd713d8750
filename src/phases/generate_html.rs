// Listing description rendered locally as escaped HTML

use async_trait::async_trait;
use tracing::instrument;

use crate::core::errors::{ServiceError, ServiceResult};
use crate::core::types::{Item, PhaseName, PhaseOutput};
use crate::phases::{Phase, PhaseContext};

pub struct GenerateHtmlPhase {
    /// Attributes rendered in the specifics table, in this order
    fields: Vec<String>,
}

impl GenerateHtmlPhase {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn render(&self, item: &Item) -> String {
        let title = item.translated_title.as_deref().unwrap_or(&item.title);
        let mut html = format!("<div class=\"listing\">\n<h2>{}</h2>\n", escape(title));

        if item.translated_title.is_some() {
            html.push_str(&format!("<p class=\"original-title\">{}</p>\n", escape(&item.title)));
        }

        let rows: Vec<String> = self
            .fields
            .iter()
            .filter_map(|field| {
                let value = item.attribute(field)?;
                if value.value.trim().is_empty() {
                    return None;
                }
                Some(format!(
                    "<tr><th>{}</th><td>{}</td></tr>",
                    escape(&label(field)),
                    escape(&value.value)
                ))
            })
            .collect();

        if !rows.is_empty() {
            html.push_str("<table class=\"item-specifics\">\n");
            for row in rows {
                html.push_str(&row);
                html.push('\n');
            }
            html.push_str("</table>\n");
        }
        html.push_str("</div>");
        html
    }
}

fn label(field: &str) -> String {
    field
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl Phase for GenerateHtmlPhase {
    fn name(&self) -> PhaseName {
        PhaseName::GenerateHtml
    }

    #[instrument(skip(self, item, _context), fields(item_id = %item.id))]
    async fn execute(&self, item: &Item, _context: &PhaseContext) -> ServiceResult<PhaseOutput> {
        if item.title.trim().is_empty() && item.translated_title.is_none() {
            return Err(ServiceError::Validation("item has no title".to_string()));
        }
        Ok(PhaseOutput::Html {
            html: self.render(item),
        })
    }
}
