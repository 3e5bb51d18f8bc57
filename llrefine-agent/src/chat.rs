//! Retrieval-augmented query loop
//!
//! Each turn embeds the question, prints the nearest corpus records, and asks
//! the model. Turns are independent; nothing carries over between questions.

use llrefine_core::{
    ChatMessage, CompletionRequest, Embedder, Error, LlmProvider, Result, RetrievedRecord,
    Retriever,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Answer prompt used when none is configured
pub const DEFAULT_TEMPLATE: &str = "
You are an expert Python programmer. Answer the following question as best as you can. You have access to the internet so you can look up information if needed.

here is the question to answer: {input}

";

const INPUT_SLOT: &str = "{input}";
const CONTEXT_SLOT: &str = "{context}";

/// Configuration for the chat loop
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Must contain `{input}`; `{context}` is optional
    pub prompt_template: String,
    /// Add retrieved records to the prompt
    pub inject_context: bool,
    /// Model override; `None` uses the provider default
    pub model: Option<String>,
    /// Shown before each question
    pub prompt_label: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            prompt_template: DEFAULT_TEMPLATE.to_string(),
            inject_context: false,
            model: None,
            prompt_label: "Ask your question: ".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn with_template(mut self, template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(INPUT_SLOT) {
            return Err(Error::config_invalid("prompt template must contain {input}")
                .with_operation("chat::config"));
        }
        self.prompt_template = template;
        Ok(self)
    }

    pub fn with_inject_context(mut self, inject: bool) -> Self {
        self.inject_context = inject;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// One completed question
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub query: String,
    pub records: Vec<RetrievedRecord>,
    pub prompt: String,
    pub answer: String,
}

/// The interactive loop
pub struct ChatLoop<P: LlmProvider, E: Embedder> {
    provider: P,
    retriever: Retriever<E>,
    config: ChatConfig,
}

impl<P: LlmProvider, E: Embedder> ChatLoop<P, E> {
    pub fn new(provider: P, retriever: Retriever<E>) -> Self {
        Self::with_config(provider, retriever, ChatConfig::default())
    }

    pub fn with_config(provider: P, retriever: Retriever<E>, config: ChatConfig) -> Self {
        Self {
            provider,
            retriever,
            config,
        }
    }

    pub fn retriever(&self) -> &Retriever<E> {
        &self.retriever
    }

    /// Retrieve, then answer one question.
    pub async fn ask(&self, query: &str) -> Result<ChatTurn> {
        let records = self.retriever.retrieve(query).await?;
        let prompt = self.render_prompt(query, &records);

        let mut request = CompletionRequest::new(vec![ChatMessage::user(prompt.clone())]);
        if let Some(model) = &self.config.model {
            request = request.with_model(model);
        }

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| e.into_error("chat::answer").with_context("provider", self.provider.name()))?;

        let answer = response
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| {
                Error::inference_failed("provider returned no content")
                    .with_operation("chat::answer")
                    .with_context("provider", self.provider.name())
            })?;

        tracing::debug!(
            records = records.len(),
            prompt_chars = prompt.len(),
            inject_context = self.config.inject_context,
            "chat turn answered"
        );

        Ok(ChatTurn {
            query: query.to_string(),
            records,
            prompt,
            answer,
        })
    }

    /// Read questions line by line until `exit`, `quit`, or end of input.
    /// Returns the number of questions answered.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut answered = 0;

        loop {
            write(&mut output, &self.config.prompt_label).await?;

            let Some(line) = lines.next_line().await.map_err(io_error)? else {
                write(&mut output, "\n").await?;
                break;
            };
            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
                break;
            }

            let turn = self.ask(query).await?;
            write(&mut output, &render_turn(&turn)).await?;
            answered += 1;
        }

        tracing::info!(answered, "chat loop finished");
        Ok(answered)
    }

    fn render_prompt(&self, input: &str, records: &[RetrievedRecord]) -> String {
        let template = &self.config.prompt_template;
        if !self.config.inject_context {
            return fill(template, input, "");
        }

        let context = records
            .iter()
            .map(|r| format!("- {}", r))
            .collect::<Vec<_>>()
            .join("\n");

        if template.contains(CONTEXT_SLOT) {
            fill(template, input, &context)
        } else {
            format!("{}\nRelevant records:\n{}\n", fill(template, input, ""), context)
        }
    }
}

/// Single pass over the template; substituted text is never rescanned.
fn fill(template: &str, input: &str, context: &str) -> String {
    let mut out = String::with_capacity(template.len() + input.len() + context.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(INPUT_SLOT) {
            out.push_str(input);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(CONTEXT_SLOT) {
            out.push_str(context);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

fn render_turn(turn: &ChatTurn) -> String {
    let mut out = String::from("Retrieved reviews:\n");
    if turn.records.is_empty() {
        out.push_str("  (none)\n");
    }
    for record in &turn.records {
        out.push_str(&format!("  {}\n", record));
    }
    out.push('\n');
    out.push_str(turn.answer.trim());
    out.push_str("\n\n");
    out
}

async fn write<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await.map_err(io_error)?;
    output.flush().await.map_err(io_error)
}

fn io_error(err: std::io::Error) -> Error {
    Error::from(err).with_operation("chat::io")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use llrefine_core::{CorpusSource, ErrorKind, ProviderError, Store, VectorIndex};

    const LAPTOPS: &str = "title,rating\n\
        Gaming desktop,4.1\n\
        UltraBook Air 13 lightweight laptop,4.7\n\
        Budget laptop,3.2\n\
        Wireless mouse,4.0\n";

    async fn chat(
        answers: Vec<std::result::Result<String, ProviderError>>,
        config: ChatConfig,
    ) -> (tempfile::TempDir, ChatLoop<ScriptedProvider, ScriptedProvider>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        std::fs::write(&path, LAPTOPS).unwrap();

        let embedder = ScriptedProvider::new(vec![]);
        let mut store = Store::memory("reviews");
        let (index, _) = VectorIndex::open_or_build(&mut store, &embedder, &CorpusSource::new(path, "title"))
            .await
            .unwrap();
        let retriever = Retriever::new(embedder, index);
        (dir, ChatLoop::with_config(ScriptedProvider::new(answers), retriever, config))
    }

    #[tokio::test]
    async fn test_best_lightweight_laptop_scenario() {
        let (_dir, chat) = chat(
            vec![Ok("The UltraBook Air 13 is a strong pick.".into())],
            ChatConfig::default(),
        )
        .await;

        let input = "best lightweight laptop\nexit\nnever asked\n";
        let mut output = Vec::new();
        let answered = chat.run(input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(answered, 1);

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.starts_with("Ask your question: Retrieved reviews:\n  [1] UltraBook Air 13"));
        assert!(printed.contains("The UltraBook Air 13 is a strong pick."));
        assert_eq!(printed.matches("Retrieved reviews:").count(), 1);

        // Records are shown to the operator but not sent to the model
        let calls = chat.provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.contains("here is the question to answer: best lightweight laptop"));
        assert!(!calls[0].1.contains("UltraBook"));
    }

    #[tokio::test]
    async fn test_inject_context_adds_records() {
        let config = ChatConfig::default().with_inject_context(true);
        let (_dir, chat) = chat(vec![Ok("Go with the UltraBook.".into())], config).await;

        let turn = chat.ask("best lightweight laptop").await.unwrap();
        assert_eq!(turn.records.len(), 3);
        assert_eq!(turn.records[0].id, "1");
        assert!(turn.prompt.contains("Relevant records:\n- [1] UltraBook Air 13 lightweight laptop"));
    }

    #[tokio::test]
    async fn test_template_context_slot() {
        let config = ChatConfig::default()
            .with_template("Q: {input}\nContext:\n{context}")
            .unwrap()
            .with_inject_context(true);
        let (_dir, chat) = chat(vec![Ok("ok".into())], config).await;

        let turn = chat.ask("gaming desktop").await.unwrap();
        assert!(turn.prompt.starts_with("Q: gaming desktop\nContext:\n- [0] Gaming desktop"));
        assert!(!turn.prompt.contains("Relevant records"));
    }

    #[tokio::test]
    async fn test_query_sent_verbatim() {
        let query = "what does {context} mean in a laptop template";

        let config = ChatConfig::default()
            .with_template("Q: {input}\nContext:\n{context}")
            .unwrap()
            .with_inject_context(true);
        let (_plain_dir, plain) = chat(vec![Ok("A slot.".into())], ChatConfig::default()).await;
        let (_injected_dir, injected) = chat(vec![Ok("A slot.".into())], config).await;

        let turn = plain.ask(query).await.unwrap();
        assert!(turn.prompt.contains(&format!("here is the question to answer: {}", query)));

        let turn = injected.ask(query).await.unwrap();
        assert!(turn.prompt.starts_with(&format!("Q: {}\nContext:\n- [", query)));
    }

    #[test]
    fn test_fill_leaves_other_braces() {
        assert_eq!(fill("{x} {input}{", "{input}", "c"), "{x} {input}{");
        assert_eq!(fill("{context}|{input}", "q", "{input}"), "{input}|q");
    }

    #[tokio::test]
    async fn test_blank_answer_is_inference_failure() {
        let (_dir, chat) = chat(vec![Ok("  \n".into())], ChatConfig::default()).await;

        let err = chat.ask("laptop").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
    }

    #[tokio::test]
    async fn test_quit_blank_lines_and_eof() {
        let (_dir, chat) = chat(vec![Ok("a".into()), Ok("b".into())], ChatConfig::default()).await;

        let mut output = Vec::new();
        let answered = chat.run("\n   \nlaptop\nQUIT\n".as_bytes(), &mut output).await.unwrap();
        assert_eq!(answered, 1);

        let mut output = Vec::new();
        let answered = chat.run("mouse".as_bytes(), &mut output).await.unwrap();
        assert_eq!(answered, 1);
        assert_eq!(chat.provider.remaining(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_ends_loop() {
        let (_dir, chat) = chat(
            vec![Err(ProviderError::Network("connection refused".into()))],
            ChatConfig::default(),
        )
        .await;

        let mut output = Vec::new();
        let err = chat.run("laptop\n".as_bytes(), &mut output).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn test_template_requires_input_slot() {
        let err = ChatConfig::default().with_template("no slot").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
