use std::fmt::Write as _;

/// Named word-count range selectable by the caller instead of a raw number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordRange {
    pub min: u32,
    pub max: u32,
}

/// Maps a length bucket to its word range. Unknown buckets fall back to
/// medium, matching the selectable options in the editor UI.
pub fn word_count_range(bucket: &str) -> WordRange {
    match bucket {
        "short" => WordRange { min: 300, max: 500 },
        "long" => WordRange { min: 800, max: 1200 },
        "very_long" => WordRange {
            min: 1200,
            max: 2000,
        },
        _ => WordRange { min: 500, max: 800 },
    }
}

pub struct PromptInput<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub tone: &'a str,
    pub word_count: &'a str,
    pub include_meta: bool,
}

/// Builds the text-generation instruction string. Pure and deterministic:
/// same inputs, same prompt.
pub fn build_prompt(input: &PromptInput) -> String {
    let range = word_count_range(input.word_count);

    let mut prompt = String::from(
        "You are an expert content writer. Generate a high-quality blog post \
         with the following specifications:\n\n",
    );
    let _ = writeln!(prompt, "Title: {}", input.title);
    if !input.description.trim().is_empty() {
        let _ = writeln!(prompt, "Description/Context: {}", input.description);
    }
    let _ = writeln!(prompt, "Word Count: {}-{} words", range.min, range.max);
    let _ = writeln!(prompt, "Tone: {}", input.tone);
    prompt.push('\n');

    prompt.push_str("Requirements:\n");
    prompt.push_str("1. Write engaging, well-structured content with clear headings\n");
    prompt.push_str("2. Use HTML formatting (h2, h3, p, ul, ol, strong, em)\n");
    prompt.push_str("3. Include relevant examples and explanations\n");
    prompt.push_str("4. Make it SEO-friendly with natural keyword usage\n");
    let _ = writeln!(prompt, "5. Write in a {} tone", input.tone);
    prompt.push_str("6. Include an introduction and conclusion\n\n");

    if input.include_meta {
        prompt.push_str("Also provide:\n");
        prompt.push_str("- A compelling meta description (150-160 characters)\n\n");
    }

    prompt.push_str("Format your response as JSON:\n{\n");
    prompt.push_str("  \"content\": \"HTML formatted content here\"\n");
    if input.include_meta {
        prompt.push_str("  \"meta_description\": \"meta description here\"\n");
    }
    prompt.push('}');

    prompt
}

/// Counts words in generated HTML with tags stripped.
pub fn count_words(html: &str) -> usize {
    strip_tags(html).split_whitespace().count()
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                // Keep tag boundaries from gluing adjacent words together.
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_bucket_embeds_its_documented_range() {
        let cases = [
            ("short", "300-500 words"),
            ("medium", "500-800 words"),
            ("long", "800-1200 words"),
            ("very_long", "1200-2000 words"),
            ("unheard_of", "500-800 words"),
        ];
        for (bucket, expected) in cases {
            let prompt = build_prompt(&PromptInput {
                title: "Rust in Production",
                description: "",
                tone: "professional",
                word_count: bucket,
                include_meta: true,
            });
            assert!(
                prompt.contains(expected),
                "bucket {bucket} missing range {expected}"
            );
        }
    }

    #[test]
    fn description_is_embedded_only_when_present() {
        let with = build_prompt(&PromptInput {
            title: "T",
            description: "context here",
            tone: "casual",
            word_count: "medium",
            include_meta: false,
        });
        assert!(with.contains("Description/Context: context here"));

        let without = build_prompt(&PromptInput {
            title: "T",
            description: "   ",
            tone: "casual",
            word_count: "medium",
            include_meta: false,
        });
        assert!(!without.contains("Description/Context"));
    }

    #[test]
    fn meta_envelope_is_requested_only_when_asked() {
        let with = build_prompt(&PromptInput {
            title: "T",
            description: "",
            tone: "formal",
            word_count: "short",
            include_meta: true,
        });
        assert!(with.contains("meta_description"));

        let without = build_prompt(&PromptInput {
            title: "T",
            description: "",
            tone: "formal",
            word_count: "short",
            include_meta: false,
        });
        assert!(!without.contains("meta_description"));
    }

    #[test]
    fn build_prompt_is_deterministic() {
        let input = PromptInput {
            title: "Same",
            description: "thing",
            tone: "technical",
            word_count: "long",
            include_meta: true,
        };
        assert_eq!(build_prompt(&input), build_prompt(&input));
    }

    #[test]
    fn word_count_ignores_markup() {
        let html = "<h2>Intro</h2><p>one two <strong>three</strong></p>";
        assert_eq!(count_words(html), 4);
    }
}
