//! Demo rows written into an empty local store on first read.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::db::{Identity, Lead, Quote, Task};
use crate::error::RepositoryError;

pub const DEMO_USER_ID: &str = "demo-user";
pub const DEMO_USER_EMAIL: &str = "demo@leadpipe.local";

const SEEDED_AT: &str = "2023-10-01T09:00:00Z";

fn decode_rows<T: DeserializeOwned>(rows: Value, key: &str) -> Result<Vec<T>, RepositoryError> {
    serde_json::from_value(rows)
        .map_err(|e| RepositoryError::Serialization(format!("fixture '{key}': {e}")))
}

pub fn identity() -> Identity {
    Identity {
        id: DEMO_USER_ID.to_string(),
        email: Some(DEMO_USER_EMAIL.to_string()),
    }
}

pub fn leads() -> Result<Vec<Lead>, RepositoryError> {
    let rows = json!([
        {
            "id": "l-1",
            "userId": DEMO_USER_ID,
            "firstName": "Alice",
            "lastName": "Dubois",
            "email": "alice@techstart.io",
            "phone": "+33 6 12 34 56 78",
            "company": "TechStart SaaS",
            "position": "CMO",
            "status": "PROPOSAL_SENT",
            "value": 12500,
            "channel": "LINKEDIN_ADS",
            "lastContacted": "2023-10-25T00:00:00Z",
            "gaData": {
                "pagesVisited": ["/tarifs", "/services/seo", "/etudes-de-cas/fintech"],
                "timeOnSite": 340,
                "campaign": "q4_lead_gen",
                "medium": "cpc",
                "landingPage": "/landing/croissance-saas"
            },
            "interactions": [
                { "id": "i-1", "type": "email", "date": "2023-10-20", "content": "Introduction email sent" },
                { "id": "i-2", "type": "quote_sent", "date": "2023-10-24", "content": "SEO & content proposal Q-2023-102 sent" }
            ],
            "createdAt": SEEDED_AT,
            "updatedAt": "2023-10-25T00:00:00Z"
        },
        {
            "id": "l-2",
            "userId": DEMO_USER_ID,
            "firstName": "Marc",
            "lastName": "Moreau",
            "email": "m.moreau@retail-solutions.fr",
            "phone": "+33 6 98 76 54 32",
            "company": "Retail Solutions",
            "position": "CEO",
            "status": "NEW",
            "value": 45000,
            "channel": "PAID_SOCIAL",
            "lastContacted": "2023-10-26T00:00:00Z",
            "gaData": {
                "pagesVisited": ["/contact", "/a-propos"],
                "timeOnSite": 45,
                "campaign": "fb_retargeting",
                "medium": "social",
                "landingPage": "/services/dev-web"
            },
            "interactions": [],
            "createdAt": SEEDED_AT,
            "updatedAt": "2023-10-26T00:00:00Z"
        },
        {
            "id": "l-3",
            "userId": DEMO_USER_ID,
            "firstName": "Sophie",
            "lastName": "Laurent",
            "email": "sophie@greenenergy.com",
            "phone": "+33 7 00 11 22 33",
            "company": "Green Energy Co",
            "position": "Marketing Director",
            "status": "QUALIFIED",
            "value": 8200,
            "channel": "ORGANIC_SEARCH",
            "lastContacted": "2023-10-22T00:00:00Z",
            "gaData": {
                "pagesVisited": ["/blog/marketing-durable", "/services/branding"],
                "timeOnSite": 120,
                "term": "agence branding paris",
                "landingPage": "/blog/marketing-durable"
            },
            "interactions": [
                { "id": "i-3", "type": "call", "date": "2023-10-22", "content": "Discovery call, interested in a rebrand" }
            ],
            "createdAt": SEEDED_AT,
            "updatedAt": "2023-10-22T00:00:00Z"
        },
        {
            "id": "l-4",
            "userId": DEMO_USER_ID,
            "firstName": "Jean",
            "lastName": "Pierre",
            "email": "jp@consulting-corp.com",
            "phone": "+33 6 55 44 33 22",
            "company": "Consulting Corp",
            "position": "Partner",
            "status": "NEGOTIATION",
            "value": 22000,
            "channel": "REFERRAL",
            "lastContacted": "2023-10-24T00:00:00Z",
            "gaData": {
                "pagesVisited": ["/accueil"],
                "timeOnSite": 600,
                "landingPage": "/"
            },
            "interactions": [
                { "id": "i-4", "type": "meeting", "date": "2023-10-15", "content": "Lunch with the CEO" },
                { "id": "i-5", "type": "quote_sent", "date": "2023-10-18", "content": "Proposal Q-2023-099 sent" }
            ],
            "createdAt": SEEDED_AT,
            "updatedAt": "2023-10-24T00:00:00Z"
        },
        {
            "id": "l-5",
            "userId": DEMO_USER_ID,
            "firstName": "Elise",
            "lastName": "Martin",
            "email": "elise@fashionbrand.com",
            "phone": "+33 6 88 99 00 11",
            "company": "Fashion Brand",
            "position": "Founder",
            "status": "CLOSED_WON",
            "value": 15000,
            "channel": "PAID_SOCIAL",
            "lastContacted": "2023-10-01T00:00:00Z",
            "gaData": {
                "pagesVisited": ["/services/social-media", "/tarifs"],
                "timeOnSite": 400,
                "campaign": "ig_stories_promo",
                "medium": "social",
                "landingPage": "/services/social-media"
            },
            "interactions": [],
            "createdAt": SEEDED_AT,
            "updatedAt": "2023-10-01T00:00:00Z"
        }
    ]);
    decode_rows(rows, "leads")
}

pub fn quotes() -> Result<Vec<Quote>, RepositoryError> {
    let rows = json!([
        {
            "id": "Q-2023-102",
            "userId": DEMO_USER_ID,
            "leadId": "l-1",
            "date": "2023-10-24",
            "status": "SENT",
            "totalAmount": 12500,
            "items": [
                { "description": "Technical SEO audit", "quantity": 1, "unitPrice": 2500, "total": 2500 },
                { "description": "Q4 content strategy", "quantity": 1, "unitPrice": 5000, "total": 5000 },
                { "description": "Monthly backlinking", "quantity": 2, "unitPrice": 2500, "total": 5000 }
            ],
            "createdAt": "2023-10-24T00:00:00Z",
            "updatedAt": "2023-10-24T00:00:00Z"
        },
        {
            "id": "Q-2023-099",
            "userId": DEMO_USER_ID,
            "leadId": "l-4",
            "date": "2023-10-18",
            "status": "ACCEPTED",
            "totalAmount": 22000,
            "items": [
                { "description": "Digital transformation pack", "quantity": 1, "unitPrice": 22000, "total": 22000 }
            ],
            "createdAt": "2023-10-18T00:00:00Z",
            "updatedAt": "2023-10-18T00:00:00Z"
        },
        {
            "id": "Q-2023-098",
            "userId": DEMO_USER_ID,
            "leadId": "l-3",
            "date": "2023-10-20",
            "status": "DRAFT",
            "totalAmount": 8200,
            "items": [
                { "description": "Visual identity redesign", "quantity": 1, "unitPrice": 8200, "total": 8200 }
            ],
            "createdAt": "2023-10-20T00:00:00Z",
            "updatedAt": "2023-10-20T00:00:00Z"
        }
    ]);
    decode_rows(rows, "quotes")
}

/// Seeded tasks are dated on the day the store is first read.
pub fn tasks() -> Result<Vec<Task>, RepositoryError> {
    let now = Utc::now();
    let today = now.date_naive().to_string();
    let rows = json!([
        {
            "id": "t-1",
            "userId": DEMO_USER_ID,
            "title": "Follow up with Alice Dubois",
            "type": "call",
            "date": today,
            "completed": false,
            "priority": true,
            "description": "Discuss the budget for the SEO proposal",
            "createdAt": now,
            "updatedAt": now
        },
        {
            "id": "t-2",
            "userId": DEMO_USER_ID,
            "title": "Prepare the demo for Consulting Corp",
            "type": "meeting",
            "date": today,
            "completed": false,
            "priority": false,
            "createdAt": now,
            "updatedAt": now
        }
    ]);
    decode_rows(rows, "tasks")
}
