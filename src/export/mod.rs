use anyhow::Result;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::aggregate::{collect_usage, AuxHit, CombinedUsage};
use crate::db::Database;
use crate::host::ContentHost;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
            ExportFormat::Html => "HTML",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            "html" => Some(ExportFormat::Html),
            _ => None,
        }
    }
}

/// Usage of one asset for export
#[derive(Debug, Serialize)]
pub struct AssetUsageReport {
    pub asset_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub mime_type: String,
    pub probably_global: bool,
    #[serde(flatten)]
    pub usage: CombinedUsage,
}

/// Write a usage report for every known asset. Returns the number of assets.
pub fn export_usage(
    db: &Database,
    output_path: &Path,
    format: ExportFormat,
    global_threshold: u32,
) -> Result<usize> {
    let reports = build_reports(db, db, global_threshold)?;
    let count = reports.len();

    match format {
        ExportFormat::Json => export_json(&reports, output_path)?,
        ExportFormat::Csv => export_csv(&reports, output_path)?,
        ExportFormat::Html => export_html(&reports, output_path)?,
    }

    Ok(count)
}

fn build_reports<H: ContentHost + ?Sized>(
    db: &Database,
    host: &H,
    global_threshold: u32,
) -> Result<Vec<AssetUsageReport>> {
    let mut reports = Vec::new();
    for asset_id in db.list_asset_ids()? {
        let Some(asset) = host.asset(asset_id)? else {
            continue;
        };
        reports.push(AssetUsageReport {
            asset_id,
            url: asset.url,
            title: asset.title,
            mime_type: asset.mime_type,
            probably_global: db.is_probably_global(asset_id, global_threshold)?,
            usage: collect_usage(db, host, asset_id)?,
        });
    }
    Ok(reports)
}

fn export_json(reports: &[AssetUsageReport], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(reports)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(reports: &[AssetUsageReport], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "asset_id",
        "asset_url",
        "probably_global",
        "source",
        "owner_id",
        "title_or_key",
        "content_url",
        "position",
    ])?;

    for report in reports {
        let asset_id = report.asset_id.to_string();
        let global = report.probably_global.to_string();
        let mut wrote_any = false;

        for hit in report.usage.posts.iter().flatten() {
            wtr.write_record([
                asset_id.as_str(),
                &report.url,
                &global,
                "content",
                &hit.id.to_string(),
                hit.title.as_deref().unwrap_or(""),
                hit.url.as_deref().unwrap_or(""),
                hit.position.map(|p| p.as_str()).unwrap_or(""),
            ])?;
            wrote_any = true;
        }

        let aux_sources: [(&str, &[AuxHit]); 3] = [
            ("content_meta", &report.usage.postmetas),
            ("site_option", &report.usage.options),
            ("user_meta", &report.usage.usermetas),
        ];
        for (source, hits) in aux_sources {
            for hit in hits {
                wtr.write_record([
                    asset_id.as_str(),
                    &report.url,
                    &global,
                    source,
                    &hit.owner_id.map(|v| v.to_string()).unwrap_or_default(),
                    &hit.key,
                    "",
                    "",
                ])?;
                wrote_any = true;
            }
        }

        if !wrote_any {
            wtr.write_record([asset_id.as_str(), &report.url, &global, "", "", "", "", ""])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

fn export_html(reports: &[AssetUsageReport], output_path: &Path) -> Result<()> {
    let mut html = String::new();

    html.push_str(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Asset Usage Report</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 1200px;
            margin: 0 auto;
            padding: 20px;
        }
        h1 {
            border-bottom: 2px solid #2271b1;
            padding-bottom: 10px;
        }
        .stats {
            background: #f0f0f1;
            padding: 15px;
            border-radius: 8px;
            margin-bottom: 20px;
        }
        .asset {
            border: 1px solid #dcdcde;
            border-radius: 8px;
            padding: 15px;
            margin-bottom: 15px;
        }
        .asset h3 {
            margin: 0 0 5px 0;
            word-break: break-all;
        }
        .asset .url {
            font-size: 12px;
            color: #646970;
            word-break: break-all;
        }
        .global {
            color: #b32d2e;
            font-size: 12px;
        }
        .unused {
            color: #646970;
            font-style: italic;
        }
    </style>
</head>
<body>
    <h1>Asset Usage Report</h1>
"#);

    let used = reports.iter().filter(|r| r.usage.post_count() > 0).count();
    html.push_str(&format!(
        r#"    <div class="stats">
        <strong>Assets:</strong> {} &middot; <strong>In use:</strong> {}
    </div>
"#,
        reports.len(),
        used
    ));

    for report in reports {
        html.push_str(r#"    <div class="asset">
"#);
        html.push_str(&format!(
            r#"        <h3>#{} {}</h3>
        <div class="url">{}</div>
"#,
            report.asset_id,
            html_escape(report.title.as_deref().unwrap_or("")),
            html_escape(&report.url)
        ));
        if report.probably_global {
            html.push_str(r#"        <div class="global">Appears on most pages</div>
"#);
        }

        match &report.usage.posts {
            Some(posts) => {
                html.push_str("        <ul>\n");
                for hit in posts {
                    let label = hit.title.as_deref().unwrap_or("(untitled)");
                    let position = hit
                        .position
                        .map(|p| format!(" <small>({})</small>", p.as_str()))
                        .unwrap_or_default();
                    match hit.url.as_deref() {
                        Some(url) => html.push_str(&format!(
                            "            <li><a href=\"{}\">{}</a>{}</li>\n",
                            html_escape(url),
                            html_escape(label),
                            position
                        )),
                        None => html.push_str(&format!(
                            "            <li>{}{}</li>\n",
                            html_escape(label),
                            position
                        )),
                    }
                }
                html.push_str("        </ul>\n");
            }
            None => html.push_str(r#"        <div class="unused">No recorded usage</div>
"#),
        }

        let aux = report.usage.postmetas.len()
            + report.usage.options.len()
            + report.usage.usermetas.len();
        if aux > 0 {
            html.push_str(&format!(
                "        <div>Also referenced from {} stored setting(s)</div>\n",
                aux
            ));
        }

        html.push_str("    </div>\n");
    }

    html.push_str(r#"</body>
</html>
"#);

    let mut file = File::create(output_path)?;
    file.write_all(html.as_bytes())?;
    Ok(())
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
