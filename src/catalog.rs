//! The Evo-KG assistant: its prompt, greeting and the knowledge-graph
//! operations the model is allowed to call.

use serde::Serialize;
use serde_json::json;

use crate::client::RemoteApiClient;
use crate::error::Result;
use crate::tool::{ParamType, ParameterSpec, ToolRegistry, ToolSpec};

const SYSTEM_PROMPT: &str = "\
You are the Evo-KG Assistant. You answer questions using data from the Evo-KG \
biomedical knowledge graph, which links genes, proteins, diseases, chemicals, \
phenotypes, aging phenotypes, epigenetic modifications, tissues, anti-aging \
interventions, hallmarks of aging and metabolites. Use the available functions \
to look up entities, explore their neighbourhood, check relationships and rank \
link predictions. Base answers on returned data and say so when the graph has \
no answer. If a function reports an error, explain it and ask the user for a \
corrected identifier instead of guessing.";

pub const ENTITY_TYPES: &[&str] = &[
    "Gene",
    "Protein",
    "Disease",
    "Chemical",
    "Phenotype",
    "Aging_Phenotype",
    "Epigenetic_Modification",
    "Tissue",
    "AA_Intervention",
    "Hallmark",
    "Metabolite",
];

pub const EXAMPLE_RELATIONS: &[&str] = &[
    "DRUG_DRUG",
    "GENE_PROTEIN",
    "GENE_DISEASE",
    "DISEASE_PHENOTYPE",
];

/// Identity of an assistant as presented to users.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    pub greeting: String,
}

impl AgentProfile {
    pub fn evokg(model: impl Into<String>) -> Self {
        Self {
            name: "Evo-KG Assistant".to_string(),
            model: model.into(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            greeting: greeting(),
        }
    }
}

fn greeting() -> String {
    format!(
        "I'm the Evo-KG Assistant. Ask me about entities in the Evo-KG knowledge graph, \
         for example \"Tell me about the gene with ID BRCA1.\"\n\n\
         Entity types: {}.\n\
         Relationships include {}, among others.",
        ENTITY_TYPES.join(", "),
        EXAMPLE_RELATIONS.join(", ")
    )
}

/// Build the tool menu from the service's own OpenAPI document, keeping
/// only the listed `operationId`s.
pub async fn openapi_toolkit(
    client: &RemoteApiClient,
    spec_url: &str,
    operations: &[String],
) -> Result<ToolRegistry> {
    let document = client.fetch_json(spec_url).await?;
    let callable: Vec<&str> = operations.iter().map(String::as_str).collect();
    let mut registry = ToolRegistry::new();
    let count = registry.register_openapi(&document, &callable)?;
    tracing::info!(%spec_url, tools = count, "loaded tool menu from OpenAPI document");
    Ok(registry)
}

/// Built-in knowledge-graph operations, used when no OpenAPI document is
/// configured.
pub fn evokg_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolSpec::new("get_gene", "/gene", "Retrieve a gene's name and description by its identifier.")
            .param(ParameterSpec::required(
                "gene_id",
                ParamType::String,
                "Gene identifier or symbol, e.g. BRCA1",
            )),
    )?;

    registry.register(
        ToolSpec::new("get_protein", "/protein", "Retrieve a protein's name and description by its identifier.")
            .param(ParameterSpec::required(
                "protein_id",
                ParamType::String,
                "Protein identifier, e.g. a UniProt accession",
            )),
    )?;

    registry.register(
        ToolSpec::new(
            "search_entities",
            "/search",
            "Search the knowledge graph for entities whose name or identifier matches a query.",
        )
        .param(ParameterSpec::required("query", ParamType::String, "Free-text search term"))
        .param(ParameterSpec::optional(
            "entity_type",
            ParamType::String,
            "Restrict results to one entity type, e.g. Gene or Disease",
        ))
        .param(
            ParameterSpec::optional("limit", ParamType::Integer, "Maximum number of matches")
                .with_default(json!(10)),
        ),
    )?;

    registry.register(
        ToolSpec::new(
            "get_subgraph",
            "/subgraph",
            "Fetch the neighbourhood of an entity: connected nodes and the relationships between them.",
        )
        .param(ParameterSpec::required("entity_id", ParamType::String, "Identifier of the centre entity"))
        .param(
            ParameterSpec::optional("depth", ParamType::Integer, "Number of hops to expand")
                .with_default(json!(1)),
        )
        .param(
            ParameterSpec::optional("limit", ParamType::Integer, "Maximum number of edges returned")
                .with_default(json!(50)),
        ),
    )?;

    registry.register(
        ToolSpec::new(
            "check_relationship",
            "/relationship",
            "Check whether two entities are directly related and report the relationship types.",
        )
        .param(ParameterSpec::required("source_id", ParamType::String, "Identifier of the first entity"))
        .param(ParameterSpec::required("target_id", ParamType::String, "Identifier of the second entity"))
        .param(ParameterSpec::optional(
            "relation",
            ParamType::String,
            "Only check this relationship type, e.g. GENE_DISEASE",
        )),
    )?;

    registry.register(
        ToolSpec::new(
            "predict_tail",
            "/predict_tail",
            "Predict the most likely tail entities for a head entity and relation using the link-prediction model.",
        )
        .param(ParameterSpec::required("head", ParamType::String, "Identifier of the head entity"))
        .param(ParameterSpec::required("relation", ParamType::String, "Relationship type, e.g. GENE_DISEASE"))
        .param(
            ParameterSpec::optional("top_k", ParamType::Integer, "Number of predictions to return")
                .with_default(json!(10)),
        ),
    )?;

    registry.register(
        ToolSpec::new(
            "prediction_rank",
            "/prediction_rank",
            "Report where a given tail entity ranks among the link-prediction model's candidates for a head and relation.",
        )
        .param(ParameterSpec::required("head", ParamType::String, "Identifier of the head entity"))
        .param(ParameterSpec::required("relation", ParamType::String, "Relationship type"))
        .param(ParameterSpec::required("tail", ParamType::String, "Identifier of the candidate tail entity")),
    )?;

    Ok(registry)
}
