pub mod gemini;
pub mod pollinations;

/// Reply body from the text provider. The upstream model does not reliably
/// honor the requested JSON envelope, so callers can see which branch the
/// defensive parse took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedReply {
    Structured {
        content: String,
        meta_description: Option<String>,
    },
    Raw {
        content: String,
    },
}

impl ParsedReply {
    pub fn content(&self) -> &str {
        match self {
            ParsedReply::Structured { content, .. } => content,
            ParsedReply::Raw { content } => content,
        }
    }

    pub fn meta_description(&self) -> Option<&str> {
        match self {
            ParsedReply::Structured {
                meta_description, ..
            } => meta_description.as_deref(),
            ParsedReply::Raw { .. } => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ParsedReply::Structured { .. })
    }
}

#[derive(Debug)]
pub struct TextGeneration {
    pub reply: ParsedReply,
    pub tokens_used: u64,
    pub model: String,
    pub cost: f64,
}

#[derive(Debug)]
pub struct GeneratedImage {
    /// `data:image/jpeg;base64,...` URI holding the image inline.
    pub url: String,
    pub prompt: String,
    pub model: String,
    pub provider: String,
}

/// Per-provider token pricing. Both supported providers are free tiers.
pub fn calculate_cost(provider: &str, tokens: u64) -> f64 {
    let rate = match provider {
        "gemini" => 0.0,
        "pollinations" => 0.0,
        _ => 0.0,
    };
    tokens as f64 * rate
}
