//! Email rendering.
//!
//! Subjects and the framing copy (greeting, intro, button label, footer) are
//! themselves settings, so the office can reword emails without a deploy.
//! Placeholders like `{tnm_number}` are substituted from the ticket/project
//! context at render time.

use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;

use crate::{
    core::settings::SettingsResolver,
    entities::{project, tnm_ticket},
    errors::Result,
};

/// Rendered subject + HTML body pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
}

/// The settings-configurable strings for one email kind.
#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub subject: String,
    pub greeting: String,
    pub intro: String,
    pub button_text: String,
    pub footer_text: String,
}

async fn setting_or(
    db: &DatabaseConnection,
    resolver: &SettingsResolver,
    key: &str,
    default: &str,
) -> Result<String> {
    Ok(resolver
        .resolve(db, key, None, None)
        .await?
        .map_or_else(|| default.to_string(), |value| value.to_string()))
}

/// Loads the configurable strings for an email kind, falling back to the
/// built-in wording.
pub async fn load_template_settings(
    db: &DatabaseConnection,
    resolver: &SettingsResolver,
    email_type: &str,
) -> Result<TemplateSettings> {
    let settings = match email_type {
        "reminder" => TemplateSettings {
            subject: setting_or(
                db,
                resolver,
                "EMAIL_REMINDER_SUBJECT",
                "REMINDER #{reminder_number}: RFCO {tnm_number} - {project_name}",
            )
            .await?,
            greeting: setting_or(
                db,
                resolver,
                "EMAIL_REMINDER_GREETING",
                "Dear General Contractor,",
            )
            .await?,
            intro: setting_or(
                db,
                resolver,
                "EMAIL_REMINDER_INTRO",
                "This is a friendly reminder that the following Request for Change Order (RFCO) is still pending your review and approval.",
            )
            .await?,
            button_text: setting_or(
                db,
                resolver,
                "EMAIL_REMINDER_BUTTON_TEXT",
                "Review & Approve RFCO",
            )
            .await?,
            footer_text: setting_or(
                db,
                resolver,
                "EMAIL_REMINDER_FOOTER_TEXT",
                "If you need additional details or have questions about this change order, please contact us immediately.",
            )
            .await?,
        },
        "approval_confirmation" => TemplateSettings {
            subject: setting_or(
                db,
                resolver,
                "EMAIL_APPROVAL_SUBJECT",
                "Change Order {status}: {tnm_number} - {project_name}",
            )
            .await?,
            greeting: String::new(),
            intro: setting_or(
                db,
                resolver,
                "EMAIL_APPROVAL_INTRO",
                "A decision has been made on the following change order.",
            )
            .await?,
            button_text: "View Ticket".to_string(),
            footer_text: String::new(),
        },
        _ => TemplateSettings {
            subject: setting_or(
                db,
                resolver,
                "EMAIL_RFCO_SUBJECT",
                "RFCO {tnm_number} - {project_name}",
            )
            .await?,
            greeting: setting_or(db, resolver, "EMAIL_RFCO_GREETING", "Dear General Contractor,")
                .await?,
            intro: setting_or(
                db,
                resolver,
                "EMAIL_RFCO_INTRO",
                "Please review the following Request for Change Order (RFCO) for your approval.",
            )
            .await?,
            button_text: setting_or(db, resolver, "EMAIL_RFCO_BUTTON_TEXT", "Review & Approve RFCO")
                .await?,
            footer_text: setting_or(
                db,
                resolver,
                "EMAIL_RFCO_FOOTER_TEXT",
                "If you have any questions about this change order, please contact us at {company_email} or {company_phone}.",
            )
            .await?,
        },
    };
    Ok(settings)
}

/// Replaces `{placeholder}` occurrences with their values.
fn substitute(template: &str, replacements: &[(&str, String)]) -> String {
    let mut result = template.to_string();
    for (placeholder, value) in replacements {
        result = result.replace(&format!("{{{placeholder}}}"), value);
    }
    result
}

fn money(amount: Decimal) -> String {
    format!("${amount:.2}")
}

fn base_replacements(
    ticket: &tnm_ticket::Model,
    proj: &project::Model,
) -> Vec<(&'static str, String)> {
    vec![
        ("tnm_number", ticket.tnm_number.clone()),
        ("project_name", proj.name.clone()),
        ("status", ticket.status.to_string()),
    ]
}

fn html_shell(
    logo_url: Option<&str>,
    greeting: &str,
    intro: &str,
    detail_rows: &str,
    link: &str,
    button_text: &str,
    footer: &str,
) -> String {
    let logo = logo_url.map_or_else(String::new, |url| {
        format!(r#"<img src="{url}" alt="Company logo" style="max-height:60px;"/>"#)
    });
    format!(
        r#"<html><body style="font-family:Arial,sans-serif;color:#222;">
{logo}
<p>{greeting}</p>
<p>{intro}</p>
<table cellpadding="6" style="border-collapse:collapse;">
{detail_rows}
</table>
<p><a href="{link}" style="background:#1a6b3c;color:#fff;padding:12px 24px;text-decoration:none;border-radius:4px;">{button_text}</a></p>
<p style="color:#777;font-size:12px;">{footer}</p>
</body></html>"#
    )
}

fn detail_row(label: &str, value: &str) -> String {
    format!(
        r#"<tr><td style="border:1px solid #ddd;"><b>{label}</b></td><td style="border:1px solid #ddd;">{value}</td></tr>"#
    )
}

/// Renders the initial RFCO email to the GC.
#[must_use]
pub fn render_rfco_email(
    ticket: &tnm_ticket::Model,
    proj: &project::Model,
    approval_link: &str,
    logo_url: Option<&str>,
    settings: &TemplateSettings,
) -> EmailContent {
    let replacements = base_replacements(ticket, proj);
    let subject = substitute(&settings.subject, &replacements);

    let rows = [
        detail_row("RFCO Number", &ticket.tnm_number),
        detail_row("Project", &proj.name),
        detail_row("Title", &ticket.title),
        detail_row("Proposal Date", &ticket.proposal_date.to_string()),
        detail_row("Proposal Amount", &money(ticket.proposal_amount)),
    ]
    .join("\n");

    let html = html_shell(
        logo_url,
        &settings.greeting,
        &substitute(&settings.intro, &replacements),
        &rows,
        approval_link,
        &settings.button_text,
        &substitute(&settings.footer_text, &replacements),
    );
    EmailContent { subject, html }
}

/// Renders a reminder email to the GC.
#[must_use]
pub fn render_reminder_email(
    ticket: &tnm_ticket::Model,
    proj: &project::Model,
    approval_link: &str,
    reminder_number: u32,
    days_pending: i64,
    logo_url: Option<&str>,
    settings: &TemplateSettings,
) -> EmailContent {
    let mut replacements = base_replacements(ticket, proj);
    replacements.push(("reminder_number", reminder_number.to_string()));
    let subject = substitute(&settings.subject, &replacements);

    let rows = [
        detail_row("RFCO Number", &ticket.tnm_number),
        detail_row("Project", &proj.name),
        detail_row("Title", &ticket.title),
        detail_row("Days Pending", &days_pending.to_string()),
        detail_row("Proposal Amount", &money(ticket.proposal_amount)),
    ]
    .join("\n");

    let html = html_shell(
        logo_url,
        &settings.greeting,
        &substitute(&settings.intro, &replacements),
        &rows,
        approval_link,
        &settings.button_text,
        &substitute(&settings.footer_text, &replacements),
    );
    EmailContent { subject, html }
}

/// Renders the internal approval-confirmation email.
#[must_use]
pub fn render_approval_confirmation_email(
    ticket: &tnm_ticket::Model,
    proj: &project::Model,
    ticket_link: &str,
    logo_url: Option<&str>,
    settings: &TemplateSettings,
) -> EmailContent {
    let replacements = base_replacements(ticket, proj);
    let subject = substitute(&settings.subject, &replacements);

    let rows = [
        detail_row("RFCO Number", &ticket.tnm_number),
        detail_row("Project", &proj.name),
        detail_row("Decision", ticket.status.as_str()),
        detail_row("Approved Amount", &money(ticket.approved_amount)),
    ]
    .join("\n");

    let html = html_shell(
        logo_url,
        "",
        &substitute(&settings.intro, &replacements),
        &rows,
        ticket_link,
        &settings.button_text,
        "",
    );
    EmailContent { subject, html }
}
