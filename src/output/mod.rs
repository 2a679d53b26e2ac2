//! Output formatting and management

use crate::banner::BannerResult;
use crate::error::ScanError;
use crate::scanner::ScanReport;
use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(ScanError::Output(format!("Unknown output format: {}", s))),
        }
    }
}

/// Write scan reports and banners to `path`, replacing any existing file
pub fn save_results<P: AsRef<Path>>(
    path: P,
    format: OutputFormat,
    reports: &[ScanReport],
    banners: &[BannerResult],
) -> crate::Result<()> {
    let path = path.as_ref();
    let generated_at = Utc::now();

    match format {
        OutputFormat::Text => {
            let mut file = File::create(path)?;
            file.write_all(format_text(reports, banners, generated_at).as_bytes())?;
        }
        OutputFormat::Json => {
            let file = File::create(path)?;
            let document = JsonResults {
                generated_at,
                reports,
                banners,
            };
            serde_json::to_writer_pretty(file, &document)?;
        }
        OutputFormat::Csv => write_csv(path, reports, banners)?,
    }

    log::info!("Results written to {}", path.display());
    Ok(())
}

/// Plain-text report: a header followed by the uncolored table
pub fn format_text(
    reports: &[ScanReport],
    banners: &[BannerResult],
    generated_at: DateTime<Utc>,
) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "# relayscan report generated at {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    for report in reports {
        output.push_str(&format!(
            "# {}: {} reachable, {} unreachable in {:.2}s{}\n",
            report.host,
            report.reachable,
            report.unreachable,
            report.duration.as_secs_f64(),
            if report.cancelled { " (cancelled)" } else { "" }
        ));
    }
    output.push('\n');
    output.push_str(&render_table(reports, banners, false));
    output
}

/// Terminal table of reachable ports and grabbed banners
pub fn render_table(reports: &[ScanReport], banners: &[BannerResult], use_color: bool) -> String {
    let paint = |text: String, color: Color| -> String {
        if use_color {
            text.color(color).to_string()
        } else {
            text
        }
    };

    let mut output = String::new();

    for report in reports {
        let open = report.open_ports();
        output.push_str(&paint(format!("{}\n", report.host), Color::BrightCyan));

        if open.is_empty() {
            output.push_str(&paint("  no reachable ports\n".to_string(), Color::BrightBlack));
            continue;
        }

        output.push_str(&format!("  {:<8} {:<6} {}\n", "PORT", "PROTO", "NOTE"));
        for outcome in report.outcomes.iter().filter(|o| o.reachable) {
            let line = format!(
                "  {:<8} {:<6} {}\n",
                outcome.target.port,
                report.network.as_str(),
                outcome.message.as_deref().unwrap_or("open")
            );
            output.push_str(&paint(line, Color::BrightGreen));
        }
    }

    if !banners.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&paint("Banners\n".to_string(), Color::BrightCyan));
        for result in banners {
            let addr = crate::network::join_host_port(&result.host, result.port);
            let line = if result.success {
                let text = result.text();
                paint(
                    format!(
                        "  {:<24} {}\n",
                        addr,
                        if text.is_empty() { "(empty)" } else { text.as_str() }
                    ),
                    Color::BrightYellow,
                )
            } else {
                paint(
                    format!(
                        "  {:<24} {}\n",
                        addr,
                        result.error.as_deref().unwrap_or("failed")
                    ),
                    Color::Red,
                )
            };
            output.push_str(&line);
        }
    }

    output
}

#[derive(Serialize)]
struct JsonResults<'a> {
    generated_at: DateTime<Utc>,
    reports: &'a [ScanReport],
    banners: &'a [BannerResult],
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct CsvRow {
    kind: String,
    host: String,
    port: u16,
    success: bool,
    detail: String,
    elapsed_ms: Option<u64>,
}

fn write_csv(path: &Path, reports: &[ScanReport], banners: &[BannerResult]) -> crate::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    for report in reports {
        for outcome in &report.outcomes {
            writer.serialize(CsvRow {
                kind: "port".to_string(),
                host: outcome.target.host.clone(),
                port: outcome.target.port,
                success: outcome.reachable,
                detail: outcome.message.clone().unwrap_or_default(),
                elapsed_ms: Some(outcome.elapsed.as_millis() as u64),
            })?;
        }
    }

    for result in banners {
        writer.serialize(CsvRow {
            kind: "banner".to_string(),
            host: result.host.clone(),
            port: result.port,
            success: result.success,
            detail: if result.success {
                result.text()
            } else {
                result.error.clone().unwrap_or_default()
            },
            elapsed_ms: None,
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Target;
    use crate::scanner::ScanOutcome;
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample() -> (Vec<ScanReport>, Vec<BannerResult>) {
        let mut report = ScanReport::new("127.0.0.1");
        let t = |port| Target::new("127.0.0.1", port).unwrap();
        report.record(ScanOutcome::reachable(t(22), Duration::from_millis(3)));
        report.record(ScanOutcome::unreachable(t(23), "refused", Duration::from_millis(1)));
        report.duration = Duration::from_millis(10);

        let banners = vec![
            BannerResult {
                host: "127.0.0.1".to_string(),
                port: 22,
                banner: Bytes::from_static(b"SSH-2.0-OpenSSH_9.6\r\n"),
                success: true,
                attempts: 1,
                error: None,
            },
            BannerResult {
                host: "10.0.0.9".to_string(),
                port: 22,
                banner: Bytes::new(),
                success: false,
                attempts: 3,
                error: Some("all 3 attempts failed".to_string()),
            },
        ];
        (vec![report], banners)
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("txt".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_render_table_plain() {
        let (reports, banners) = sample();
        let table = render_table(&reports, &banners, false);
        assert!(table.contains("127.0.0.1\n"));
        assert!(table.contains("22"));
        assert!(!table.contains("23 "));
        assert!(table.contains("SSH-2.0-OpenSSH_9.6"));
        assert!(table.contains("all 3 attempts failed"));
        assert!(!table.contains("\x1b["));
    }

    #[test]
    fn test_save_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let (reports, banners) = sample();
        save_results(&path, OutputFormat::Text, &reports, &banners).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# relayscan report generated at "));
        assert!(content.contains("1 reachable, 1 unreachable"));
    }

    #[test]
    fn test_save_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let (reports, banners) = sample();
        save_results(&path, OutputFormat::Json, &reports, &banners).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["generated_at"].is_string());
        assert_eq!(value["reports"][0]["reachable"], 1);
        assert_eq!(value["reports"][0]["outcomes"][0]["target"]["port"], 22);
        assert_eq!(value["banners"][1]["success"], false);
    }

    #[test]
    fn test_save_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let (reports, banners) = sample();
        save_results(&path, OutputFormat::Csv, &reports, &banners).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<CsvRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].kind, "port");
        assert!(rows[0].success);
        assert_eq!(rows[1].detail, "refused");
        assert_eq!(rows[2].detail, "SSH-2.0-OpenSSH_9.6");
        assert_eq!(rows[3].elapsed_ms, None);
    }
}
