// src/matching.rs
//
// Duplicate-patient detection. The database narrows candidates by date of
// birth plus email-or-phone; the name comparison happens here.

use uuid::Uuid;

const NAME_KEY_LEN: usize = 10;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PatientCandidate {
    pub patient_id: Uuid,
    pub name: String,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatientMatch {
    NoMatch,
    Existing { patient_id: Uuid, user_id: Option<Uuid> },
    Ambiguous(usize),
}

/// Whitespace removed, lowercased, first ten characters.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .take(NAME_KEY_LEN)
        .collect()
}

pub fn resolve(candidates: &[PatientCandidate], submitted_name: &str) -> PatientMatch {
    let key = normalize_name(submitted_name);
    let matches: Vec<&PatientCandidate> = candidates
        .iter()
        .filter(|c| normalize_name(&c.name) == key)
        .collect();

    match matches.as_slice() {
        [] => PatientMatch::NoMatch,
        [only] => PatientMatch::Existing {
            patient_id: only.patient_id,
            user_id: only.user_id,
        },
        many => PatientMatch::Ambiguous(many.len()),
    }
}
