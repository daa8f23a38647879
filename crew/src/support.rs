//! The canonical customer-support crew.
//!
//! Three stages: a support representative answers from the documentation
//! site, a QA specialist reviews (and may delegate), and a final reviewer
//! edits for clarity without touching code blocks.

use std::sync::Arc;

use crate::core::scope::SourceScope;
use crate::core::types::{Agent, Task};
use crate::pipeline::{Pipeline, PipelineError};
use crate::reasoning::Reasoner;
use crate::tools::ToolCapability;

/// Bindings every run of the support crew must supply.
pub const BINDING_KEYS: [&str; 3] = ["customer", "person", "inquiry"];

pub const DEFAULT_CUSTOMER: &str = "DeepLearningAI";
pub const DEFAULT_PERSON: &str = "Adi";

pub const SUPPORT_REPRESENTATIVE: &str = "Senior Support Representative";
pub const QUALITY_ASSURANCE: &str = "Support Quality Assurance Specialist";
pub const FINAL_REVIEW: &str = "Final Review Specialist";

/// Lookup tools shared by the crew.
#[derive(Clone)]
pub struct SupportTools {
    pub search: Arc<dyn ToolCapability>,
    pub scrape: Arc<dyn ToolCapability>,
}

impl SupportTools {
    fn all(&self) -> Vec<Arc<dyn ToolCapability>> {
        vec![Arc::clone(&self.scrape), Arc::clone(&self.search)]
    }
}

pub fn support_crew(
    tools: SupportTools,
    reasoner: Arc<dyn Reasoner>,
    docs_scope: SourceScope,
) -> Result<Pipeline, PipelineError> {
    let docs = docs_scope.to_string();

    let support_agent = Arc::new(
        Agent::new(
            SUPPORT_REPRESENTATIVE,
            "Be the most friendly and helpful support representative in your team",
            format!(
                "You work at OpenAI ({docs}) and are now working on providing support to \
                 {{customer}}, a super important customer for your company. You need to make \
                 sure that you provide the best support! You have access to all the docs on the \
                 OpenAI platform. Make sure to provide full, complete answers, and make no \
                 assumptions. When including code snippets, provide the entire code together \
                 without breaking it apart, so it's easy to copy and paste if needed. Ensure \
                 that code snippets are included in the final response when available in the \
                 specific website docs."
            ),
        )
        .with_tools(tools.all())
        .with_verbose(true),
    );

    let quality_assurance_agent = Arc::new(
        Agent::new(
            QUALITY_ASSURANCE,
            "Get recognition for providing the best support quality assurance in your team",
            format!(
                "You work at OpenAI ({docs}) and are now working with your team on a request \
                 from {{customer}} ensuring that the support representative is providing the \
                 best support possible. You need to make sure that the support representative \
                 is providing full, complete answers, meeting all the user requirements, and \
                 make no assumptions. Ensure that code snippets are provided in full without \
                 breaking them apart."
            ),
        )
        .with_side_effects(true)
        .with_verbose(true),
    );

    let final_review_agent = Arc::new(
        Agent::new(
            FINAL_REVIEW,
            "Ensure the final response is clear, concise, and free from repetition or confusion.",
            "You are an expert in content editing and quality control. Your role is to review \
             the final customer support response and ensure it is polished, concise, and \
             completely free of redundancies or mixed-up information. Ensure that code \
             snippets are provided in full without breaking them apart.",
        )
        .with_verbose(true),
    );

    let inquiry_resolution = Task::new(
        "inquiry_resolution",
        format!(
            "{{customer}} just reached out with a super important ask:\n{{inquiry}}\n\n\
             {{person}} from {{customer}} is the one that reached out. Make sure to use \
             everything you know to provide the best support possible. Look up the OpenAI docs \
             (website - {docs}) related to the user inquiry and use the information found on \
             the documentation website. You are only to stick to the information found on the \
             documentation website and not deviate to information found on other websites. \
             Make sure that when you are accessing information from the website, you at all \
             times have to access the code snippets of the information. The user has a \
             specific request that code snippets related to the query have to be included in \
             the final response; this is only if they are available in the specific website \
             docs. The query might contain multiple questions that might need you to go to \
             different pages that start with {docs}/. You must do so to answer every question \
             that the customer asks you. You must strive to provide a complete and accurate \
             response to the customer's inquiry. When including code snippets, provide the \
             entire code together without breaking it apart, so it's easy to copy and paste \
             if needed."
        ),
        "A detailed, informative response to the customer's inquiry that addresses all \
         aspects of their question. The response should include references to everything you \
         used to find the answer, including external data or solutions. Ensure the answer is \
         complete, leaving no questions unanswered, and maintain a helpful and friendly tone \
         throughout. When including code snippets, provide them in full without breaking them \
         apart.",
        support_agent,
    )
    .with_source_scope(docs_scope.clone());

    let quality_assurance_review = Task::new(
        "quality_assurance_review",
        "Review the response drafted by the Senior Support Representative for {customer}'s \
         inquiry. Ensure that the answer is comprehensive, accurate, and adheres to the \
         customer's inquiry. Ensure that every part of the question is answered, even if it \
         takes the first agent looking up multiple websites to answer the question. Ensure \
         that all the user's demands are met, mainly the inclusion of code snippets in the \
         final response (only if they are part of the website docs). High-quality standards \
         are expected for customer support. Verify that all parts of the customer's inquiry \
         have been addressed thoroughly, with a helpful and friendly tone. Check for \
         references and sources used to find the information, ensuring the response is \
         well-supported and leaves no questions unanswered. When including code snippets, \
         ensure they are provided in full without breaking them apart. Also make sure that \
         the code snippets provided are correct: they might be outdated or syntactically \
         wrong.",
        "A final, detailed, and informative response ready to be sent to the customer. This \
         response should fully address the customer's inquiry, incorporating all relevant \
         feedback and improvements. Don't be too formal; we are a chill and cool company but \
         maintain a professional and friendly tone throughout. When including code snippets, \
         provide them in full without breaking them apart.",
        quality_assurance_agent,
    )
    .with_tools(tools.all())
    .with_delegation(true)
    .with_source_scope(docs_scope);

    let final_review = Task::new(
        "final_review",
        "Review the response produced by the Support and QA agents. Your goal is to eliminate \
         any repetition, confusion, or verbosity, ensuring the response is concise, clear, and \
         professional. Maintain a friendly and helpful tone throughout. Ensure that code \
         snippets are provided in full without breaking them apart.",
        "A refined and polished response that is free from repetition, confusion, and \
         unnecessary verbosity, ready to be sent to the customer. Code snippets should be \
         provided in full without breaking them apart.",
        final_review_agent,
    )
    .with_tools(Vec::new())
    .with_delegation(false)
    .with_preserved_code_blocks();

    Pipeline::new(
        vec![inquiry_resolution, quality_assurance_review, final_review],
        reasoner,
    )
}
