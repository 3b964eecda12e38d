use std::io::Write;

use owo_colors::OwoColorize;
use venuerank_core::pipeline::PipelineEvent;
use venuerank_core::{Confidence, MatchResult, Rank, RankStats};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Render a rank badge like `[CCF-A]`.
pub fn rank_badge(rank: Rank, color: ColorMode) -> String {
    let badge = format!("[CCF-{}]", rank);
    if !color.enabled() {
        return badge;
    }
    match rank {
        Rank::A => badge.red().bold().to_string(),
        Rank::B => badge.yellow().bold().to_string(),
        Rank::C => badge.blue().bold().to_string(),
    }
}

fn confidence_label(confidence: Confidence) -> &'static str {
    confidence.as_str()
}

/// Shorten a long title for single-line display. Counts characters, not
/// bytes, so titles with accents or math symbols never split mid-character.
fn truncate_title(title: &str) -> String {
    if title.chars().count() > 60 {
        let head: String = title.chars().take(60).collect();
        format!("{head}...")
    } else {
        title.to_string()
    }
}

/// Print a real-time pipeline event.
pub fn print_event(w: &mut dyn Write, event: &PipelineEvent, color: ColorMode) -> std::io::Result<()> {
    match event {
        PipelineEvent::ScanStarted { site, total } => {
            writeln!(w, "Scanning {} listing ({} papers)...", site, total)?;
        }
        PipelineEvent::BadgeMounted {
            id,
            abbr,
            rank,
            confidence,
            ..
        } => {
            writeln!(
                w,
                "  {} {} {} ({})",
                rank_badge(*rank, color),
                abbr,
                id,
                confidence_label(*confidence)
            )?;
        }
        PipelineEvent::VenueUnmatched { id, venue } => {
            if color.enabled() {
                writeln!(w, "  {} {} ({})", "[?]".dimmed(), id, venue.dimmed())?;
            } else {
                writeln!(w, "  [?] {} ({})", id, venue)?;
            }
        }
        PipelineEvent::LookupQueued { id, title } => {
            writeln!(w, "  looking up {} \"{}\"", id, truncate_title(title))?;
        }
        PipelineEvent::LookupResolved { id, venue, matched } => match venue {
            Some(venue) if *matched => {
                writeln!(w, "  resolved {} -> {}", id, venue)?;
            }
            Some(venue) => {
                writeln!(w, "  resolved {} -> {} (not in catalog)", id, venue)?;
            }
            None => {
                writeln!(w, "  no venue found for {}", id)?;
            }
        },
        PipelineEvent::LookupFailed { id, error } => {
            if color.enabled() {
                writeln!(w, "  {} lookup for {}: {}", "FAILED".red(), id, error)?;
            } else {
                writeln!(w, "  FAILED lookup for {}: {}", id, error)?;
            }
        }
        PipelineEvent::ChangeDetected { site } => {
            writeln!(w, "Listing changed on {}, rescanning...", site)?;
        }
    }
    Ok(())
}

/// Print the outcome of a standalone venue match.
pub fn print_match(w: &mut dyn Write, result: &MatchResult, color: ColorMode) -> std::io::Result<()> {
    match result.entry {
        Some(ref entry) => {
            writeln!(
                w,
                "{} {} — {}",
                rank_badge(entry.rank, color),
                entry.abbr,
                entry.name
            )?;
            writeln!(w, "  confidence: {}", confidence_label(result.confidence))?;
            if result.cleaned_venue != result.original_venue {
                writeln!(w, "  cleaned:    \"{}\"", result.cleaned_venue)?;
            }
        }
        None => {
            if color.enabled() {
                writeln!(w, "{}", "no match".dimmed())?;
            } else {
                writeln!(w, "no match")?;
            }
        }
    }
    Ok(())
}

/// Print the final rank tally.
pub fn print_summary(w: &mut dyn Write, stats: &RankStats, color: ColorMode) -> std::io::Result<()> {
    writeln!(w)?;
    writeln!(w, "{} papers processed", stats.total())?;
    writeln!(w, "  {} {}", rank_badge(Rank::A, color), stats.a)?;
    writeln!(w, "  {} {}", rank_badge(Rank::B, color), stats.b)?;
    writeln!(w, "  {} {}", rank_badge(Rank::C, color), stats.c)?;
    if color.enabled() {
        writeln!(w, "  {}   {}", "[?]".dimmed(), stats.unknown)?;
    } else {
        writeln!(w, "  [?]   {}", stats.unknown)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_title_passes_through() {
        assert_eq!(truncate_title("Attention Is All You Need"), "Attention Is All You Need");
    }

    #[test]
    fn long_title_truncates_at_sixty_chars() {
        let title = "x".repeat(80);
        let short = truncate_title(&title);
        assert_eq!(short, format!("{}...", "x".repeat(60)));
    }

    #[test]
    fn multibyte_title_truncates_on_char_boundary() {
        // 59 ASCII chars put the accented char right on the cut point
        let title = format!("{}é{}", "a".repeat(59), "b".repeat(20));
        let short = truncate_title(&title);
        assert_eq!(short, format!("{}é...", "a".repeat(59)));
    }

    #[test]
    fn queued_event_prints_multibyte_title() {
        let event = PipelineEvent::LookupQueued {
            id: "2403.00001".to_string(),
            title: format!("{}é{}", "a".repeat(59), "b".repeat(20)),
        };
        let mut buf = Vec::new();
        print_event(&mut buf, &event, ColorMode(false)).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("é..."));
    }
}
