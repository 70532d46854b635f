//! Seed bundles: flat collections of forms, versions, questions, choices and
//! rules, grouped into installable form versions.

use std::collections::HashMap;

use flow_core::model::{
    BranchingRule, Choice, Form, FormError, FormVersion, FormVersionId, Question, QuestionId,
    QuestionType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::repository::{FormRepository, FormVersionBundle, StorageError};

const DEMO_SEED: &str = include_str!("../seeds/demo-health-survey.json");

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error("invalid seed file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] flow_core::Error),

    #[error("form version {0} references an unknown form")]
    UnknownForm(FormVersionId),

    #[error("{0} references unknown form version {1}")]
    UnknownVersion(String, FormVersionId),

    #[error("choice {0} references unknown question {1}")]
    UnknownQuestion(String, QuestionId),

    #[error("question {0} does not take choices")]
    UnexpectedChoices(QuestionId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSeed {
    pub id: QuestionId,
    pub form_version_id: FormVersionId,
    pub uid: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default)]
    pub required: bool,
    pub order: i32,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceSeed {
    pub question_id: QuestionId,
    #[serde(flatten)]
    pub choice: Choice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSeed {
    pub form_version_id: FormVersionId,
    #[serde(flatten)]
    pub rule: BranchingRule,
}

/// The on-disk seed format, one array per collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedBundle {
    #[serde(default)]
    pub forms: Vec<Form>,
    #[serde(default)]
    pub form_versions: Vec<FormVersion>,
    #[serde(default)]
    pub questions: Vec<QuestionSeed>,
    #[serde(default)]
    pub question_choices: Vec<ChoiceSeed>,
    #[serde(default)]
    pub branching_rules: Vec<RuleSeed>,
}

impl SeedBundle {
    /// # Errors
    ///
    /// Returns `SeedError::Json` when the text is not a valid bundle.
    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The built-in `demo-health-survey` form.
    ///
    /// # Errors
    ///
    /// Returns `SeedError::Json` if the embedded bundle fails to parse.
    pub fn demo() -> Result<Self, SeedError> {
        Self::from_json(DEMO_SEED)
    }

    /// Group the flat collections into one `(Form, FormVersionBundle)` per
    /// version.
    ///
    /// # Errors
    ///
    /// Returns `SeedError` when a row references a missing parent or a
    /// question row is invalid.
    pub fn into_installs(self) -> Result<Vec<(Form, FormVersionBundle)>, SeedError> {
        let forms: HashMap<_, _> = self
            .forms
            .into_iter()
            .map(|form| {
                if form.slug.trim().is_empty() {
                    return Err(SeedError::Model(FormError::EmptySlug.into()));
                }
                Ok((form.id.clone(), form))
            })
            .collect::<Result<_, SeedError>>()?;

        let mut choices: HashMap<QuestionId, Vec<Choice>> = HashMap::new();
        for seed in self.question_choices {
            choices.entry(seed.question_id).or_default().push(seed.choice);
        }

        let mut questions: HashMap<FormVersionId, Vec<Question>> = HashMap::new();
        for seed in self.questions {
            let seed_choices = choices.remove(&seed.id).unwrap_or_default();
            if !seed_choices.is_empty() && !seed.kind.has_choices() {
                return Err(SeedError::UnexpectedChoices(seed.id));
            }
            let question = Question::new(
                seed.id.clone(),
                seed.uid,
                seed.label,
                seed.kind,
                seed.required,
                seed.order,
            )
            .map_err(flow_core::Error::from)?
            .with_form_version(seed.form_version_id.clone())
            .with_settings(seed.settings)
            .with_archived(seed.archived)
            .with_choices(seed_choices);
            questions
                .entry(seed.form_version_id)
                .or_default()
                .push(question);
        }
        if let Some((question_id, orphans)) = choices.into_iter().next() {
            let choice_id = orphans.into_iter().next().map(|c| c.id).unwrap_or_default();
            return Err(SeedError::UnknownQuestion(choice_id, question_id));
        }

        let mut rules: HashMap<FormVersionId, Vec<BranchingRule>> = HashMap::new();
        for seed in self.branching_rules {
            rules.entry(seed.form_version_id).or_default().push(seed.rule);
        }

        let mut installs = Vec::with_capacity(self.form_versions.len());
        for version in self.form_versions {
            let form = forms
                .get(&version.form_id)
                .cloned()
                .ok_or_else(|| SeedError::UnknownForm(version.id.clone()))?;
            let bundle = FormVersionBundle {
                questions: questions.remove(&version.id).unwrap_or_default(),
                rules: rules.remove(&version.id).unwrap_or_default(),
                version,
            };
            installs.push((form, bundle));
        }

        if let Some((version_id, _)) = questions.into_iter().next() {
            return Err(SeedError::UnknownVersion("question".into(), version_id));
        }
        if let Some((version_id, _)) = rules.into_iter().next() {
            return Err(SeedError::UnknownVersion("branching rule".into(), version_id));
        }

        Ok(installs)
    }
}

/// Install every form version of the bundle. Returns how many were installed.
///
/// # Errors
///
/// Returns `SeedError` when the bundle is inconsistent or the repository
/// rejects a write.
pub async fn install_bundle(
    forms: &dyn FormRepository,
    bundle: SeedBundle,
) -> Result<usize, SeedError> {
    let installs = bundle.into_installs()?;
    for (form, version) in &installs {
        forms.install_form(form, version).await?;
        tracing::info!(
            form = %form.slug,
            version = %version.version.id,
            questions = version.questions.len(),
            rules = version.rules.len(),
            "Installed form version"
        );
    }
    Ok(installs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use flow_core::model::RuleOperator;

    #[test]
    fn demo_bundle_groups_into_one_version() {
        let installs = SeedBundle::demo().unwrap().into_installs().unwrap();
        assert_eq!(installs.len(), 1);

        let (form, bundle) = &installs[0];
        assert_eq!(form.slug, "demo-health-survey");
        assert_eq!(form.active_version_id.as_ref(), Some(&bundle.version.id));
        assert_eq!(bundle.questions.len(), 6);
        assert_eq!(bundle.rules.len(), 5);

        let overall = bundle
            .questions
            .iter()
            .find(|q| q.uid().as_str() == "overall_health")
            .unwrap();
        assert_eq!(overall.choices().len(), 4);
        assert_eq!(overall.choices()[0].value, "excellent");
    }

    #[test]
    fn demo_rule_values_decode_in_catalog() {
        let (_, bundle) = SeedBundle::demo()
            .unwrap()
            .into_installs()
            .unwrap()
            .remove(0);
        let catalog = bundle.into_catalog();
        let rule = catalog
            .rules()
            .iter()
            .find(|r| r.operator == RuleOperator::In)
            .unwrap();
        assert_eq!(rule.value, serde_json::json!(["excellent", "good"]));
    }

    #[test]
    fn orphan_choice_is_rejected() {
        let mut bundle = SeedBundle::demo().unwrap();
        bundle.question_choices.push(ChoiceSeed {
            question_id: QuestionId::from("q-missing"),
            choice: Choice {
                id: "c-orphan".into(),
                label: "Orphan".into(),
                value: "orphan".into(),
                order: 1,
                is_default: false,
            },
        });
        let err = bundle.into_installs().unwrap_err();
        assert!(matches!(err, SeedError::UnknownQuestion(id, _) if id == "c-orphan"));
    }

    #[test]
    fn choices_on_text_question_are_rejected() {
        let mut bundle = SeedBundle::demo().unwrap();
        let mut choice = bundle.question_choices[0].clone();
        choice.question_id = QuestionId::from("q-name");
        bundle.question_choices.push(choice);
        assert!(matches!(
            bundle.into_installs(),
            Err(SeedError::UnexpectedChoices(id)) if id.as_str() == "q-name"
        ));
    }

    #[test]
    fn blank_slug_is_a_model_error() {
        let mut bundle = SeedBundle::demo().unwrap();
        bundle.forms[0].slug = " ".into();
        assert!(matches!(
            bundle.into_installs(),
            Err(SeedError::Model(flow_core::Error::Form(FormError::EmptySlug)))
        ));
    }

    #[test]
    fn version_without_form_is_rejected() {
        let mut bundle = SeedBundle::demo().unwrap();
        bundle.forms.clear();
        assert!(matches!(
            bundle.into_installs(),
            Err(SeedError::UnknownForm(_))
        ));
    }

    #[tokio::test]
    async fn installs_demo_into_repository() {
        let repo = InMemoryRepository::new();
        let count = install_bundle(&repo, SeedBundle::demo().unwrap())
            .await
            .unwrap();
        assert_eq!(count, 1);
        let form = repo
            .published_form_by_slug("demo-health-survey")
            .await
            .unwrap()
            .unwrap();
        assert!(form.exit_map.contains_key("high_risk"));
    }
}
