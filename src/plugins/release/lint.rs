//! Template checker for release posts.
//!
//! A post is a captioned banner whose caption follows a fixed layout:
//! hashtags, a bold title, build info, changelog/bugs/notes, downloads and
//! a footer. Each section is checked on its own; missing sections and
//! wrong letter case are reported separately.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info};

use crate::telegram::{EntityKind, TextEntity};

const RELEASE_TYPES: [&str; 2] = ["UNOFFICIAL", "OFFICIAL"];
const BUILD_TYPES: [&str; 3] = ["ROM", "KERNEL", "RECOVERY"];
const DEVICES: [&str; 5] = ["RM6785", "RMX2001", "RMX2151", "salaa", "nemo"];
const ANDROID_VERSIONS: [&str; 7] = ["A10", "A11", "A12", "A13", "A14", "A15", "A16"];
const RUI_VERSIONS: [&str; 3] = ["RUI1", "RUI2", "RUI3"];

const TITLES: [&str; 3] = [
    "for Realme 6/6i(Indian)/6s/7/Narzo/Narzo 20 Pro/Narzo 30 4G",
    "for Realme 6/6i(Indian)/6s/Narzo ONLY",
    "for Realme 7/Narzo 20 Pro/Narzo 30 4G ONLY",
];

/// Outcome of a lint run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintReport {
    pub ok: bool,
    /// HTML text for the chat.
    pub text: String,
}

const ROM_FOOTER: [&str; 3] = ["Sources", "Screenshots", "Support group"];
const KERNEL_FOOTER: [&str; 2] = ["Sources", "Support group"];

/// Compiles `pattern`, logging and returning `None` when it is invalid.
fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| error!("invalid lint pattern {:?}: {}", pattern, e))
        .ok()
}

/// A pattern compiled as written and case-insensitively.
struct CasedPattern {
    exact: Option<Regex>,
    loose: Option<Regex>,
}

impl CasedPattern {
    fn new(pattern: &str) -> Self {
        Self {
            exact: compile(pattern),
            loose: compile(&format!("(?i){pattern}")),
        }
    }

    fn matches(&self, text: &str) -> bool {
        found(self.exact.as_ref(), text)
    }

    fn matches_ignore_case(&self, text: &str) -> bool {
        found(self.loose.as_ref(), text)
    }
}

type Pattern = LazyLock<Option<Regex>>;

static HASHTAG: Pattern = LazyLock::new(|| compile(r"#\w+"));
static TITLE: Pattern = LazyLock::new(|| compile(r"(?m)^.*\w +for.*$"));
static TITLE_DEVICE: Pattern = LazyLock::new(|| compile(r"(Realme 6|Realme 7|Narzo)"));
static TITLE_STAGE: Pattern = LazyLock::new(|| compile(r"\[([^\]]+)\]$"));
static AUTHOR: Pattern = LazyLock::new(|| compile(r"\n• Author: (.+)"));
static BUILD_DATE: Pattern = LazyLock::new(|| {
    compile(r"\n• Build date: (0?[1-9]|[12][0-9]|3[01])-(0?[1-9]|1[0-2])-\d{4}")
});
static CHANGELOG_BUGS: LazyLock<CasedPattern> = LazyLock::new(|| {
    CasedPattern::new(r"\n\nChangelog\n(.+\n)+\nBugs\n(.+\n)+(\nNotes\n(.+\n)+)?")
});
static CHANGELOG_LIST: Pattern = LazyLock::new(|| compile(r"\n\nChangelog\n•"));
static BUGS_LIST: Pattern = LazyLock::new(|| compile(r"\nBugs\n•"));
static NOTE_HEADER: Pattern = LazyLock::new(|| compile(r"(?i)\nNote"));
static NOTES_LIST: Pattern = LazyLock::new(|| compile(r"\nNotes\n•"));
static ROM_DOWNLOADS: LazyLock<CasedPattern> = LazyLock::new(|| {
    CasedPattern::new(r"\n\nDownloads\n• Build type:(.+)?\n• File size:(.+)?\n• Download\n")
});
static KERNEL_DOWNLOADS: LazyLock<CasedPattern> =
    LazyLock::new(|| CasedPattern::new(r"\n\nDownloads\n• File size:(.+)?\n• Download\n"));
static BUILD_TYPE_LINE: Pattern = LazyLock::new(|| compile(r"\n• Build type: (.+)"));
static FILE_SIZE_LINE: Pattern = LazyLock::new(|| compile(r"\n• File size: (.+)"));
static ROM_FOOTER_LINES: LazyLock<CasedPattern> =
    LazyLock::new(|| CasedPattern::new(&footer_pattern(&ROM_FOOTER)));
static KERNEL_FOOTER_LINES: LazyLock<CasedPattern> =
    LazyLock::new(|| CasedPattern::new(&footer_pattern(&KERNEL_FOOTER)));

fn footer_pattern(lines: &[&str]) -> String {
    format!(r"\n{}", lines.join(r"\n"))
}

fn search<'t>(pattern: Option<&Regex>, text: &'t str) -> Option<&'t str> {
    pattern?.find(text).map(|m| m.as_str())
}

fn found(pattern: Option<&Regex>, text: &str) -> bool {
    pattern.is_some_and(|re| re.is_match(text))
}

fn one_of(tag: Option<&str>, allowed: &[&str]) -> bool {
    tag.is_some_and(|t| allowed.contains(&t))
}

/// Formats a section, empty when it has no errors.
fn section(name: &str, errors: &str) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!("{name}:\n{errors}")
    }
}

#[derive(Debug, Default)]
struct Linter {
    kernel: bool,
    bold_title: bool,
    bold_notes: bool,
    bold_changelog: bool,
    bold_bugs: bool,
    bold_downloads: bool,
}

/// Lints a release post caption.
#[must_use]
pub fn lint_post(text: &str, entities: &[TextEntity]) -> LintReport {
    info!(
        "starting linting telegram post ({} chars, {} entities)",
        text.chars().count(),
        entities.len()
    );

    let mut linter = Linter::default();
    let sections = [
        linter.hashtags(text),
        linter.bold(text, entities),
        linter.title(text),
        linter.build_info(text),
        linter.changelog_bugs(text),
        linter.downloads(text),
        linter.footer(text),
    ];

    let errors: Vec<String> = sections.into_iter().filter(|s| !s.is_empty()).collect();
    let ok = errors.is_empty();
    info!("lint completed, status: {}", ok);

    let text = if ok {
        "Seems good 🤌\nBot approves".to_owned()
    } else {
        format!("<b>ERRORS</b>\n\n{}", errors.join("\n"))
    };
    LintReport { ok, text }
}

impl Linter {
    fn hashtags(&mut self, text: &str) -> String {
        let Some(re) = HASHTAG.as_ref() else {
            return String::new();
        };
        let tags: Vec<&str> = re.find_iter(text).map(|m| &m.as_str()[1..]).collect();
        info!("found hashtags: {:?}", tags);

        if tags.is_empty() {
            return section("Hashtags", "• No hashtags were found.\n");
        }

        let tag = |i: usize| tags.get(i).copied();
        let build = tag(1);
        let release_type = tag(2);
        let mut device = tag(3);
        let mut android = tag(4);
        let mut rui = tag(5);

        if build == Some("KERNEL") {
            info!("kernel build detected");
            self.kernel = true;
            device = tag(2);
            rui = tag(3);
        } else if android.is_some_and(|a| a.contains("RMX")) {
            info!("rmx-style hashtag order detected");
            android = tag(5);
            rui = tag(6);
        }

        let mut errors = String::new();
        if !one_of(build, &BUILD_TYPES) {
            errors.push_str(
                "• Incorrect build type mentioned on the second hashtag. (ROM/KERNEL/RECOVERY)\n",
            );
        }
        if !self.kernel && !one_of(release_type, &RELEASE_TYPES) {
            errors.push_str(
                "• Incorrect release type mentioned on the third hashtag. (OFFICIAL/UNOFFICIAL)\n",
            );
        }
        if !one_of(device, &DEVICES) {
            let position = if self.kernel { "third" } else { "fourth" };
            errors.push_str(&format!(
                "• Incorrect device mentioned on the {position} hashtag. (RM6785/RMX2001/RMX2151/salaa)\n"
            ));
        }
        if !self.kernel && !one_of(android, &ANDROID_VERSIONS) {
            errors.push_str(
                "• Incorrect Android version mentioned on the fifth hashtag. (A10/A11/A12/A13/A14/A15/A16)\n",
            );
        }
        if !one_of(rui, &RUI_VERSIONS) {
            errors.push_str(
                "• Incorrect RealmeUI version mentioned on the last hashtag. (RUI1/RUI2/RUI3)\n",
            );
        }

        section("Hashtags", &errors)
    }

    /// Records which headers are bold. Reports nothing by itself.
    fn bold(&mut self, text: &str, entities: &[TextEntity]) -> String {
        if !text.contains("Notes") {
            self.bold_notes = true;
        }

        for entity in entities.iter().filter(|e| e.kind == EntityKind::Bold) {
            let word = entity.slice(text);
            if word.contains("Notes") {
                self.bold_notes = true;
            } else if word.contains("Changelog") {
                self.bold_changelog = true;
            } else if word.contains("Bugs") {
                self.bold_bugs = true;
            } else if word.contains("Downloads") {
                self.bold_downloads = true;
            } else if TITLES.iter().any(|title| word.contains(title)) {
                self.bold_title = true;
            }
        }

        info!(
            "bold flags: title={} notes={} changelog={} bugs={} downloads={}",
            self.bold_title, self.bold_notes, self.bold_changelog, self.bold_bugs, self.bold_downloads
        );
        String::new()
    }

    fn title(&self, text: &str) -> String {
        let Some(title) = search(TITLE.as_ref(), text) else {
            return section("Title", "• No title found.\n");
        };
        info!("extracted title: {}", title);

        let mut errors = String::new();
        if !self.bold_title {
            errors.push_str("• Missing bold format on title\n");
        }
        if !found(TITLE_DEVICE.as_ref(), title) {
            errors.push_str("• Missing or incorrect order of device in title.\n");
        }
        if !found(TITLE_STAGE.as_ref(), title.trim_end_matches('\r')) {
            errors.push_str("• Missing build's stability stage. (ALPHA/BETA/STABLE)\n");
        }
        section("Title", &errors)
    }

    fn build_info(&self, text: &str) -> String {
        let kind = if self.kernel { "Kernel" } else { "Android" };
        let section_pattern = CasedPattern::new(&format!(
            r"(.+)\n• Author:(.+)?\n• {kind} version:(.+)?\n• Build date:(.+)?"
        ));

        if !section_pattern.matches_ignore_case(text) {
            return section("Build info", "• Invalid build info section\n");
        }

        let mut errors = String::new();
        if !section_pattern.matches(text) {
            errors.push_str("• Incorrect case\n");
        }
        if !found(AUTHOR.as_ref(), text) {
            errors.push_str("• Invalid author info\n");
        }
        if !found(compile(&format!(r"\n• {kind} version: (.+)")).as_ref(), text) {
            errors.push_str(&format!("• Invalid {kind} version info\n"));
        }
        if !found(BUILD_DATE.as_ref(), text) {
            errors.push_str("• Invalid build date info (Required format: DD-MM-YYYY)\n");
        }
        section("Build info", &errors)
    }

    fn changelog_bugs(&self, text: &str) -> String {
        if !CHANGELOG_BUGS.matches_ignore_case(text) {
            return section("Changelog/Bugs", "• Invalid Changelog/Bugs section.\n");
        }

        let mut errors = String::new();
        if !CHANGELOG_BUGS.matches(text) {
            errors.push_str("• Incorrect case.\n");
        }
        if !self.bold_changelog {
            errors.push_str("• Missing bold format on Changelog\n");
        }
        if !self.bold_bugs {
            errors.push_str("• Missing bold format on Bugs\n");
        }
        if !self.bold_notes {
            errors.push_str("• Missing bold format on Notes\n");
        }
        if !found(CHANGELOG_LIST.as_ref(), text) {
            errors.push_str("• Invalid Changelog section.\n");
        }
        if !found(BUGS_LIST.as_ref(), text) {
            errors.push_str("• Invalid Bugs section.\n");
        }
        if found(NOTE_HEADER.as_ref(), text) && !found(NOTES_LIST.as_ref(), text) {
            errors.push_str("• Invalid notes section.\n");
        }
        section("Changelog/Bugs", &errors)
    }

    fn downloads(&self, text: &str) -> String {
        let pattern = if self.kernel {
            &*KERNEL_DOWNLOADS
        } else {
            &*ROM_DOWNLOADS
        };

        if !pattern.matches_ignore_case(text) {
            return section("Downloads", "• Invalid Downloads section.\n");
        }

        let mut errors = String::new();
        if !pattern.matches(text) {
            errors.push_str("• Incorrect case.\n");
        } else if !self.bold_downloads {
            errors.push_str("• Missing bold format on Downloads.\n");
        }
        if !self.kernel && !found(BUILD_TYPE_LINE.as_ref(), text) {
            errors.push_str("• Invalid build type\n");
        }
        if !found(FILE_SIZE_LINE.as_ref(), text) {
            errors.push_str("• Invalid file size\n");
        }
        section("Downloads", &errors)
    }

    fn footer(&self, text: &str) -> String {
        let (lines, pattern): (&[&str], &CasedPattern) = if self.kernel {
            (&KERNEL_FOOTER, &KERNEL_FOOTER_LINES)
        } else {
            (&ROM_FOOTER, &ROM_FOOTER_LINES)
        };
        let expected = lines.join("\n");

        if !pattern.matches_ignore_case(text) {
            return section(
                "Footer",
                &format!("• Invalid footer section.\n  Should be written exactly like this:\n{expected}\n"),
            );
        }
        if !pattern.matches(text) {
            return section(
                "Footer",
                &format!("• Incorrect case.\nCorrect usage:\n{expected}\n"),
            );
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_patterns_compile() {
        let patterns = [
            &HASHTAG,
            &TITLE,
            &TITLE_DEVICE,
            &TITLE_STAGE,
            &AUTHOR,
            &BUILD_DATE,
            &CHANGELOG_LIST,
            &BUGS_LIST,
            &NOTE_HEADER,
            &NOTES_LIST,
            &BUILD_TYPE_LINE,
            &FILE_SIZE_LINE,
        ];
        assert!(patterns.iter().all(|p| p.is_some()));

        let cased = [
            &CHANGELOG_BUGS,
            &ROM_DOWNLOADS,
            &KERNEL_DOWNLOADS,
            &ROM_FOOTER_LINES,
            &KERNEL_FOOTER_LINES,
        ];
        assert!(cased.iter().all(|p| p.exact.is_some() && p.loose.is_some()));
    }

    #[test]
    fn test_cased_pattern() {
        let pattern = CasedPattern::new(r"\nSources");
        assert!(pattern.matches("x\nSources"));
        assert!(!pattern.matches("x\nsources"));
        assert!(pattern.matches_ignore_case("x\nsources"));
    }

    const ROM_POST: &str = "#realme #ROM #OFFICIAL #RM6785 #A14 #RUI2

crDroid v10.5 for Realme 6/6i(Indian)/6s/7/Narzo/Narzo 20 Pro/Narzo 30 4G [STABLE]
• Author: someone
• Android version: 14
• Build date: 12-11-2024

Changelog
• Initial release

Bugs
• None known

Downloads
• Build type: Vanilla
• File size: 1.2 GB
• Download
Sources
Screenshots
Support group";

    const KERNEL_POST: &str = "#realme #KERNEL #RM6785 #RUI2

Zeus kernel for Realme 6/6i(Indian)/6s/Narzo ONLY [BETA]
• Author: someone
• Kernel version: 4.14.356
• Build date: 1-2-2025

Changelog
• Faster

Bugs
• None

Notes
• Flash with care

Downloads
• File size: 30 MB
• Download
Sources
Support group";

    /// Bold entity over the first occurrence of `needle`.
    fn bold(text: &str, needle: &str) -> TextEntity {
        let start = text.find(needle).unwrap();
        TextEntity::new(
            EntityKind::Bold,
            text[..start].encode_utf16().count(),
            needle.encode_utf16().count(),
        )
    }

    fn rom_entities(text: &str) -> Vec<TextEntity> {
        vec![
            bold(text, "crDroid v10.5 for Realme 6/6i(Indian)/6s/7/Narzo/Narzo 20 Pro/Narzo 30 4G [STABLE]"),
            bold(text, "Changelog"),
            bold(text, "Bugs"),
            bold(text, "Downloads"),
        ]
    }

    #[test]
    fn test_valid_rom_post() {
        let report = lint_post(ROM_POST, &rom_entities(ROM_POST));
        assert!(report.ok, "{}", report.text);
        assert_eq!(report.text, "Seems good 🤌\nBot approves");
    }

    #[test]
    fn test_valid_kernel_post() {
        let entities = vec![
            bold(KERNEL_POST, "Zeus kernel for Realme 6/6i(Indian)/6s/Narzo ONLY [BETA]"),
            bold(KERNEL_POST, "Changelog"),
            bold(KERNEL_POST, "Bugs"),
            bold(KERNEL_POST, "Notes"),
            bold(KERNEL_POST, "Downloads"),
        ];
        let report = lint_post(KERNEL_POST, &entities);
        assert!(report.ok, "{}", report.text);
    }

    #[test]
    fn test_missing_bold_is_reported() {
        let report = lint_post(ROM_POST, &[]);
        assert!(!report.ok);
        assert!(report.text.starts_with("<b>ERRORS</b>\n"));
        assert!(report.text.contains("• Missing bold format on title"));
        assert!(report.text.contains("• Missing bold format on Changelog"));
        assert!(report.text.contains("• Missing bold format on Downloads."));
    }

    #[test]
    fn test_no_hashtags() {
        let text = ROM_POST.replace('#', "");
        let report = lint_post(&text, &rom_entities(&text));
        assert!(report.text.contains("Hashtags:\n• No hashtags were found."));
    }

    #[test]
    fn test_bad_hashtags() {
        let text = ROM_POST.replace("#OFFICIAL #RM6785 #A14", "#BETA #RMX9999 #A9");
        let report = lint_post(&text, &rom_entities(&text));
        assert!(report.text.contains("Incorrect release type mentioned on the third hashtag"));
        assert!(report.text.contains("Incorrect device mentioned on the fourth hashtag"));
        assert!(report.text.contains("Incorrect Android version mentioned on the fifth hashtag"));
        assert!(!report.text.contains("build type mentioned"));
    }

    #[test]
    fn test_short_kernel_hashtags_do_not_panic() {
        let text = KERNEL_POST.replace("#realme #KERNEL #RM6785 #RUI2", "#realme #KERNEL");
        let report = lint_post(&text, &[]);
        assert!(report.text.contains("Incorrect device mentioned on the third hashtag"));
        assert!(report.text.contains("Incorrect RealmeUI version"));
    }

    #[test]
    fn test_rmx_hashtag_order() {
        let text = ROM_POST.replace(
            "#RM6785 #A14 #RUI2",
            "#RMX2001 #RMX2151 #A14 #RUI2",
        );
        let report = lint_post(&text, &rom_entities(&text));
        assert!(report.ok, "{}", report.text);
    }

    #[test]
    fn test_title_without_stage() {
        let text = ROM_POST.replace(" [STABLE]", "");
        let entities = vec![
            bold(&text, "crDroid v10.5 for Realme 6/6i(Indian)/6s/7/Narzo/Narzo 20 Pro/Narzo 30 4G"),
            bold(&text, "Changelog"),
            bold(&text, "Bugs"),
            bold(&text, "Downloads"),
        ];
        let report = lint_post(&text, &entities);
        assert!(report.text.contains("Title:\n• Missing build's stability stage."));
    }

    #[test]
    fn test_build_date_format() {
        let text = ROM_POST.replace("12-11-2024", "2024/11/12");
        let report = lint_post(&text, &rom_entities(&text));
        assert!(report.text.contains("• Invalid build date info"));
    }

    #[test]
    fn test_wrong_case_sections() {
        let text = ROM_POST
            .replace("\nChangelog\n", "\nchangelog\n")
            .replace("\nScreenshots\n", "\nscreenshots\n");
        let report = lint_post(&text, &rom_entities(ROM_POST));
        assert!(report.text.contains("Changelog/Bugs:\n• Incorrect case."));
        assert!(report.text.contains("Footer:\n• Incorrect case."));
    }

    #[test]
    fn test_missing_footer() {
        let text = ROM_POST.replace("\nScreenshots", "");
        let report = lint_post(&text, &rom_entities(&text));
        assert!(report.text.contains("Footer:\n• Invalid footer section."));
        assert!(report.text.contains("Sources\nScreenshots\nSupport group"));
    }

    #[test]
    fn test_notes_must_be_a_list() {
        let text = KERNEL_POST.replace("Notes\n• Flash", "Notes\nFlash");
        let report = lint_post(&text, &[bold(&text, "Notes")]);
        assert!(report.text.contains("• Invalid notes section."));
    }

    #[test]
    fn test_bold_offsets_are_utf16() {
        let text = format!("🔥 {ROM_POST}");
        let report = lint_post(&text, &rom_entities(&text));
        assert!(report.ok, "{}", report.text);
    }
}
