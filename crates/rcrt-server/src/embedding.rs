//! Embedding provider (C2). The ONNX path ports the teacher's own
//! tokenizer+session pipeline behind the `embed-onnx` feature; the null
//! provider keeps the rest of the substrate usable without a model.

pub const EMBED_DIM: usize = 384;

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

pub struct NullEmbeddingProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("embedding disabled (no embed-onnx feature / no model configured)")
    }
}

/// Schemas worth spending an embedding on. System/stats records have no
/// semantic value and would just pollute cosine search with noise.
pub fn should_embed_schema(schema: Option<&str>) -> bool {
    match schema {
        Some("system.hygiene.v1") | Some("system.metrics.v1") | Some("system.context-metrics.v1") => {
            false
        }
        _ => true,
    }
}

#[cfg(feature = "embed-onnx")]
pub mod onnx {
    use super::*;
    use ndarray::{Array2, CowArray};
    use ort::{Environment, ExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder, Value};
    use std::sync::{Arc, Mutex, OnceLock};
    use tokenizers::Tokenizer;

    pub struct OnnxEmbeddingProvider {
        tokenizer: Tokenizer,
        session: Mutex<Session>,
    }

    static ENV: OnceLock<Arc<Environment>> = OnceLock::new();

    impl OnnxEmbeddingProvider {
        pub fn load(tokenizer_path: &str, model_path: &str) -> anyhow::Result<Self> {
            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

            let env = ENV
                .get_or_init(|| {
                    Arc::new(
                        Environment::builder()
                            .with_name("rcrt-embed")
                            .with_execution_providers([ExecutionProvider::CPU(Default::default())])
                            .build()
                            .expect("onnx environment init"),
                    )
                })
                .clone();

            let session = SessionBuilder::new(&env)?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_model_from_file(model_path)?;

            Ok(OnnxEmbeddingProvider {
                tokenizer,
                session: Mutex::new(session),
            })
        }

        fn run(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| anyhow::anyhow!("tokenize failed: {e}"))?;

            let ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
            let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&x| x as i64).collect();
            let type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&x| x as i64).collect();
            let seq_len = ids.len();

            let input_ids = Array2::from_shape_vec((1, seq_len), ids)?;
            let attention_mask = Array2::from_shape_vec((1, seq_len), mask)?;
            let token_type_ids = Array2::from_shape_vec((1, seq_len), type_ids)?;

            let session = self.session.lock().unwrap();
            let input_ids = CowArray::from(input_ids.into_dyn());
            let attention_mask_arr = CowArray::from(attention_mask.into_dyn());
            let token_type_arr = CowArray::from(token_type_ids.into_dyn());

            let inputs = vec![
                Value::from_array(session.allocator(), &input_ids)?,
                Value::from_array(session.allocator(), &attention_mask_arr)?,
                Value::from_array(session.allocator(), &token_type_arr)?,
            ];

            let outputs = session
                .run(inputs)
                .or_else(|_| {
                    let inputs = vec![Value::from_array(session.allocator(), &input_ids)?];
                    session.run(inputs)
                })
                .map_err(|e| anyhow::anyhow!("onnx inference failed: {e}"))?;

            let output = outputs[0].try_extract::<f32>()?;
            let view = output.view();
            let shape = view.shape();

            let mut pooled = if shape.len() == 3 {
                let hidden = shape[2];
                let mut acc = vec![0.0f32; hidden];
                let tokens = shape[1];
                for t in 0..tokens {
                    for h in 0..hidden {
                        acc[h] += view[[0, t, h]];
                    }
                }
                for h in acc.iter_mut() {
                    *h /= tokens.max(1) as f32;
                }
                acc
            } else {
                view.iter().copied().collect()
            };

            pooled.resize(EMBED_DIM, 0.0);
            let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in pooled.iter_mut() {
                    *v /= norm;
                }
            }
            Ok(pooled)
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for OnnxEmbeddingProvider {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            // Inference is CPU-bound but short; the teacher's own `embed_text`
            // ran it inline on the request task rather than via spawn_blocking.
            self.run(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_schemas_skip_embedding() {
        assert!(!should_embed_schema(Some("system.hygiene.v1")));
        assert!(!should_embed_schema(Some("system.metrics.v1")));
    }

    #[test]
    fn unknown_schemas_default_to_embed() {
        assert!(should_embed_schema(Some("custom.schema.v1")));
        assert!(should_embed_schema(None));
    }
}
