use handlebars::Handlebars;
use serde::Serialize;
use turnstile_core::{CoreError, CoreResult, DocumentRenderer, RenderedDocument};
use turnstile_shared::{BatchDetail, IndividualTicket};

const SHEET: &str = "sheet";

const SHEET_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<style>
body{font-family:sans-serif;margin:16px}
.grid{display:flex;flex-wrap:wrap;gap:12px}
.card{border:1px dashed #888;padding:8px;width:220px;text-align:center;page-break-inside:avoid}
.card img{width:180px;height:180px}
.code{font-family:monospace;font-size:12px}
</style>
</head>
<body>
<h1>{{title}}</h1>
{{#if fixture}}<h2>{{fixture}}</h2>{{/if}}
<p>{{event_date}} {{start_time}}-{{end_time}}{{#if venue}} &middot; {{venue}}{{/if}}</p>
<div class="grid">
{{#each tickets}}
<div class="card">
{{#if qr_image}}<img src="{{qr_image}}" alt="QR">{{else}}<p>(no QR image)</p>{{/if}}
<div>#{{number}} {{tier}}</div>
<div>{{price}}{{#if seat}} &middot; {{seat}}{{/if}}</div>
<div class="code">{{code}}</div>
</div>
{{/each}}
</div>
</body>
</html>
"#;

/// Printable HTML sheet: one card per ticket with its QR image, tier and
/// number, in ticket-number order. Field values are HTML-escaped by the
/// template engine.
pub struct HtmlSheetRenderer {
    registry: Handlebars<'static>,
}

#[derive(Serialize)]
struct SheetData<'a> {
    title: &'a str,
    fixture: Option<String>,
    event_date: &'a str,
    start_time: &'a str,
    end_time: &'a str,
    venue: Option<&'a str>,
    tickets: Vec<CardData<'a>>,
}

#[derive(Serialize)]
struct CardData<'a> {
    number: u32,
    tier: &'a str,
    price: String,
    seat: Option<String>,
    code: &'a str,
    qr_image: Option<&'a str>,
}

impl HtmlSheetRenderer {
    pub fn new() -> CoreResult<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(SHEET, SHEET_TEMPLATE)
            .map_err(|e| CoreError::Document(format!("sheet template: {}", e)))?;
        Ok(Self { registry })
    }
}

impl DocumentRenderer for HtmlSheetRenderer {
    fn render(&self, detail: &BatchDetail) -> CoreResult<RenderedDocument> {
        let batch = &detail.batch;
        let mut tickets: Vec<_> = detail.tickets.iter().collect();
        tickets.sort_by_key(|t| t.ticket_number);

        let data = SheetData {
            title: &batch.title,
            fixture: match (&batch.home_team, &batch.away_team) {
                (Some(home), Some(away)) => Some(format!("{} vs {}", home, away)),
                _ => None,
            },
            event_date: &batch.event_date,
            start_time: &batch.start_time,
            end_time: &batch.end_time,
            venue: batch.venue_name.as_deref(),
            tickets: tickets
                .iter()
                .map(|t| CardData {
                    number: t.ticket_number,
                    tier: detail.tier_name(t.tier_id).unwrap_or(""),
                    price: detail
                        .tiers
                        .iter()
                        .find(|tier| tier.id == t.tier_id)
                        .map(|tier| format!("{:.2}", tier.price))
                        .unwrap_or_default(),
                    seat: seat_label(t),
                    code: &t.ticket_code,
                    qr_image: t.qr_image.as_deref(),
                })
                .collect(),
        };
        let html = self
            .registry
            .render(SHEET, &data)
            .map_err(|e| CoreError::Document(e.to_string()))?;

        Ok(RenderedDocument {
            file_name: format!("tickets-{}.html", batch.code_prefix().to_lowercase()),
            content_type: "text/html; charset=utf-8".to_string(),
            bytes: html.into_bytes(),
        })
    }
}

/// "Section A, Row 3, Seat 12", or None for general admission
fn seat_label(ticket: &IndividualTicket) -> Option<String> {
    let parts: Vec<String> = [
        ("Section", &ticket.seat_section),
        ("Row", &ticket.seat_row),
        ("Seat", &ticket.seat_number),
    ]
    .iter()
    .filter_map(|(label, value)| value.as_deref().map(|v| format!("{} {}", label, v)))
    .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
