//! Prompt text for the three generative actions.

use crate::db::Lead;

fn pages_visited(lead: &Lead, none: &str) -> String {
    if lead.analytics.pages_visited.is_empty() {
        none.to_string()
    } else {
        lead.analytics.pages_visited.join(", ")
    }
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "unknown"
    } else {
        value
    }
}

pub fn analyze_lead(lead: &Lead) -> String {
    format!(
        "You are a senior CRM analyst at a B2B digital agency.\n\
         Analyse the following lead using data from our website and GA4.\n\
         \n\
         Lead: {name} from {company} ({position}).\n\
         Acquisition channel: {channel}.\n\
         GA4 data: visited {pages}. Time on site: {seconds}s. Landing page: {landing}.\n\
         Current status: {status}.\n\
         Deal potential: EUR {value}.\n\
         Number of past interactions: {interactions}.\n\
         \n\
         Answer strictly in JSON with these fields:\n\
         1. score: a number between 0 and 100 rating the lead quality.\n\
         2. summary: a one-sentence reading of their intent based on pages visited and channel.\n\
         3. nextAction: the single best next sales action (e.g. \"Send case study X\", \"Call now\").\n\
         4. dealProbability: a percentage as a string (e.g. \"65%\").\n\
         \n\
         Output strictly JSON.",
        name = lead.full_name(),
        company = or_unknown(&lead.company),
        position = or_unknown(&lead.position),
        channel = lead.channel.label(),
        pages = pages_visited(lead, "no pages"),
        seconds = lead.analytics.time_on_site,
        landing = or_unknown(&lead.analytics.landing_page),
        status = lead.status.as_str(),
        value = lead.value,
        interactions = lead.interactions.len(),
    )
}

pub fn generate_email(lead: &Lead) -> String {
    format!(
        "Write a short, punchy, personalised email body to send a quote to this lead.\n\
         Context: we are a digital agency.\n\
         Lead: {first_name} from {company}.\n\
         Interests based on browsing history: {pages}.\n\
         Tone: professional but modern and direct.\n\
         Do not include a subject line.",
        first_name = lead.first_name,
        company = or_unknown(&lead.company),
        pages = pages_visited(lead, "not available"),
    )
}

pub fn generate_quote(lead: &Lead) -> String {
    format!(
        "Act as an expert sales director. Produce a list of quote line items (services) \
         for this lead, based on their sector and the pages they visited.\n\
         \n\
         Client: {company}\n\
         Likely sector: unknown, infer it from the company name as best you can.\n\
         Pages visited: {pages}.\n\
         Estimated budget: EUR {value}.\n\
         \n\
         Rules:\n\
         1. Create 3 to 5 relevant service lines (e.g. \"SEO audit\", \"Landing page build\", \"Ads campaign setup\").\n\
         2. Prices must be realistic and add up to roughly EUR {value}.\n\
         3. Return ONLY a JSON array.\n\
         \n\
         Expected format:\n\
         [\n\
         \x20   {{ \"description\": \"Service name\", \"quantity\": 1, \"unitPrice\": 1000, \"total\": 1000 }}\n\
         ]",
        company = or_unknown(&lead.company),
        pages = pages_visited(lead, "not available"),
        value = lead.value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::local::fixtures;

    fn alice() -> Lead {
        fixtures::leads()
            .expect("fixtures")
            .into_iter()
            .find(|l| l.id == "l-1")
            .expect("l-1")
    }

    #[test]
    fn analysis_prompt_carries_lead_signals() {
        let prompt = analyze_lead(&alice());
        assert!(prompt.contains("Alice Dubois from TechStart SaaS (CMO)"));
        assert!(prompt.contains("LinkedIn Ads"));
        assert!(prompt.contains("/tarifs, /services/seo"));
        assert!(prompt.contains("Time on site: 340s"));
        assert!(prompt.contains("Number of past interactions: 2"));
    }

    #[test]
    fn quote_prompt_handles_missing_pages() {
        let mut lead = alice();
        lead.analytics.pages_visited.clear();
        let prompt = generate_quote(&lead);
        assert!(prompt.contains("Pages visited: not available."));
        assert!(prompt.contains("\"unitPrice\": 1000"));
    }
}
