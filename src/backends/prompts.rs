//! Prompts for the LLM-backed collaborators.
//!
//! Both [`super::VisionOcr`] and [`super::LlmRefiner`] accept an override;
//! these constants are used otherwise.

/// System prompt for transcribing one page image.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe the text of the page image.

Rules:
1. Reproduce ALL visible text exactly, in natural reading order.
2. Keep paragraph breaks. Keep list markers and numbering as printed.
3. Render tables as GFM pipe tables.
4. Do NOT translate, summarise, or correct the text.
5. Do NOT describe images, logos, or layout.
6. If the page has no readable text, output nothing.
7. Output ONLY the transcription, without fences or commentary."#;

/// System prompt for repairing low-quality OCR output.
pub const REFINE_SYSTEM_PROMPT: &str = r#"You are an expert at cleaning up text extracted by OCR.
Fix common OCR errors (misread characters, broken words, stray symbols, garbled runs) and improve readability while keeping the original meaning.

Rules:
1. Keep the original language. Do NOT translate.
2. Do NOT add information that is not in the input.
3. If a passage is unrecoverable, drop it rather than invent content.
4. Output ONLY the corrected text, without commentary."#;
