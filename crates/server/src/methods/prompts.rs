use std::collections::HashMap;

use tabwire_protocol::{
    RpcError,
    mcp::{
        GetPromptParams, GetPromptResult, PromptArgument, PromptDef, PromptMessage,
        PromptsListResult, ToolContent, methods,
    },
};

use {super::MethodRegistry, crate::error::parse_params};

struct PromptTemplate {
    name: &'static str,
    description: &'static str,
    arguments: &'static [(&'static str, &'static str)],
    body: &'static str,
}

const PROMPTS: &[PromptTemplate] = &[
    PromptTemplate {
        name: "browse-and-summarize",
        description: "Open a page in the connected browser and summarize it.",
        arguments: &[("url", "Page to open")],
        body: "Use browser_navigate to open {url}. Once it has loaded, call browser_snapshot \
               and browser_get_text, then write a concise summary of the page: its purpose, \
               the main sections, and any calls to action.",
    },
    PromptTemplate {
        name: "fill-form",
        description: "Fill in and submit a web form from a plain-language description.",
        arguments: &[
            ("url", "Page containing the form"),
            ("description", "What to enter in the form"),
        ],
        body: "Use browser_navigate to open {url} and call browser_snapshot to find the form \
               fields. Fill them in with browser_type and browser_select_option according to \
               this description: {description}. Take a browser_screenshot before submitting \
               and report what was entered.",
    },
];

pub fn builtin_prompts() -> Vec<PromptDef> {
    PROMPTS
        .iter()
        .map(|p| PromptDef {
            name: p.name.into(),
            description: Some(p.description.into()),
            arguments: p
                .arguments
                .iter()
                .map(|(name, description)| PromptArgument {
                    name: (*name).into(),
                    description: Some((*description).into()),
                    required: true,
                })
                .collect(),
        })
        .collect()
}

fn render(name: &str, args: &HashMap<String, String>) -> Result<GetPromptResult, RpcError> {
    let template = PROMPTS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| RpcError::invalid_params(format!("unknown prompt: {name}")))?;

    let mut text = template.body.to_string();
    for (arg, _) in template.arguments {
        let value = args
            .get(*arg)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                RpcError::invalid_params(format!("prompt '{name}' requires argument '{arg}'"))
            })?;
        text = text.replace(&format!("{{{arg}}}"), value);
    }

    Ok(GetPromptResult {
        description: Some(template.description.into()),
        messages: vec![PromptMessage {
            role: "user".into(),
            content: ToolContent::text(text),
        }],
    })
}

pub(super) fn register(reg: &mut MethodRegistry) {
    // prompts/list
    reg.register(
        methods::PROMPTS_LIST,
        Box::new(|_ctx| {
            Box::pin(async move {
                serde_json::to_value(PromptsListResult {
                    prompts: builtin_prompts(),
                })
                .map_err(|e| RpcError::internal(e.to_string()))
            })
        }),
    );

    // prompts/get
    reg.register(
        methods::PROMPTS_GET,
        Box::new(|ctx| {
            Box::pin(async move {
                let params: GetPromptParams = parse_params(&ctx.params)?;
                let result = render(&params.name, &params.arguments)?;
                serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
            })
        }),
    );
}
