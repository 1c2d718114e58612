use serde::{Deserialize, Serialize};

/// The seven-part analysis returned by the model. Field order is the render order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalysisResult {
    pub fact_check: String,
    pub insult_check: String,
    pub soft_war_check: String,
    pub source_origin: String,
    pub argument: String,
    pub suggested_response: String,
    pub religious_quote: String,
}

impl AnalysisResult {
    pub fn get(&self, section: Section) -> &str {
        match section {
            Section::FactCheck => &self.fact_check,
            Section::InsultCheck => &self.insult_check,
            Section::SoftWarCheck => &self.soft_war_check,
            Section::SourceOrigin => &self.source_origin,
            Section::Argument => &self.argument,
            Section::SuggestedResponse => &self.suggested_response,
            Section::ReligiousQuote => &self.religious_quote,
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = (Section, &str)> + '_ {
        Section::ALL.iter().map(move |&s| (s, self.get(s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    FactCheck,
    InsultCheck,
    SoftWarCheck,
    SourceOrigin,
    Argument,
    SuggestedResponse,
    ReligiousQuote,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::FactCheck,
        Section::InsultCheck,
        Section::SoftWarCheck,
        Section::SourceOrigin,
        Section::Argument,
        Section::SuggestedResponse,
        Section::ReligiousQuote,
    ];

    /// Wire key, as used in the response schema and in `/copy/{key}`.
    pub fn key(self) -> &'static str {
        match self {
            Section::FactCheck => "factCheck",
            Section::InsultCheck => "insultCheck",
            Section::SoftWarCheck => "softWarCheck",
            Section::SourceOrigin => "sourceOrigin",
            Section::Argument => "argument",
            Section::SuggestedResponse => "suggestedResponse",
            Section::ReligiousQuote => "religiousQuote",
        }
    }

    pub fn from_key(key: &str) -> Option<Section> {
        Section::ALL.iter().copied().find(|s| s.key() == key)
    }

    pub fn title(self) -> &'static str {
        match self {
            Section::FactCheck => "۱. بررسی صحت و استناد تاریخی",
            Section::InsultCheck => "۲. بررسی توهین به مقدسات",
            Section::SoftWarCheck => "۳. تحلیل جنگ نرم و ناتوی فرهنگی",
            Section::SourceOrigin => "۴. منبع‌شناسی و ریشه‌یابی",
            Section::Argument => "۵. استدلال منطقی و کوبنده",
            Section::SuggestedResponse => "۶. متن پیشنهادی برای پاسخ (کامنت)",
            Section::ReligiousQuote => "۷. کلام نور (آیه/حدیث/رهبری)",
        }
    }

    /// Description sent with the response schema for this field.
    pub fn schema_description(self) -> &'static str {
        match self {
            Section::FactCheck => "Answer to Q1: Contains lies/distortions? Refutation sources.",
            Section::InsultCheck => "Answer to Q2: Insult to sacred values? Details.",
            Section::SoftWarCheck => "Answer to Q3: Soft war/Cultural NATO signs.",
            Section::SourceOrigin => {
                "Answer to Q4: Origin/Source of claim (Hostile media vs others)."
            }
            Section::Argument => {
                "Answer to Q5: Short, strong logical/political argument (10-12 lines)."
            }
            Section::SuggestedResponse => {
                "Answer to Q6: Polite, revolutionary, documented comment draft."
            }
            Section::ReligiousQuote => {
                "Answer to Q7: Quran verse, Hadith, or Leader quote refuting the claim."
            }
        }
    }

    pub fn copyable(self) -> bool {
        matches!(self, Section::Argument | Section::SuggestedResponse)
    }

    pub fn emphasized(self) -> bool {
        self == Section::SuggestedResponse
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Analyzing,
    Success,
    Error,
}

/// Body of `POST /api/analyze`.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: String,
    /// Data URL or bare base64.
    #[serde(default)]
    pub image: Option<String>,
}
