//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: wm-engine — self-authenticating multi-modal content watermarking.
//

//! PDF engine: triple-layer payload carrier (spec.md §4.7, grounded on
//! `original_source/backend/watermarking/pdf_watermark.py`):
//!
//! 1. A custom `/WM_PAYLOAD` document-info metadata entry, hex-encoded.
//! 2. The `/Keywords` document-info entry, zero-width encoded.
//! 3. A hidden `/FreeText` annotation on every page, invisible and
//!    zero-point-font, carrying the zero-width encoding again.
//!
//! Verify tries metadata, then `/Keywords`, then annotations across all
//! pages; first valid HMAC wins (spec.md §4.7).

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

use crate::error::CodecError;
use crate::key::SecretKey;
use crate::payload::{build_payload, derive_wm_id, parse_payload, to_bits, PAYLOAD_BITS};
use crate::zw::{decode_to_bits, encode_bits};

const META_KEY: &[u8] = b"WM_PAYLOAD";

fn get_or_create_info(document: &mut Document) -> ObjectId {
    if let Ok(&Object::Reference(id)) = document.trailer.get(b"Info") {
        return id;
    }
    let id = document.add_object(Dictionary::new());
    document.trailer.set("Info", Object::Reference(id));
    id
}

fn hidden_annotation(zw_text: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set("Subtype", Object::Name(b"FreeText".to_vec()));
    dict.set(
        "Rect",
        Object::Array(vec![0.0.into(), 0.0.into(), 0.1.into(), 0.1.into()]),
    );
    dict.set("Contents", Object::String(zw_text.as_bytes().to_vec(), StringFormat::Literal));
    // Flags: Invisible (bit 2) | Hidden (bit 6) = 2 + 32 + 1(NoZoom not set)... spec value is the literal 3
    // mirrored from the original PDF tool: Invisible(1) + Hidden(2) = 3.
    dict.set("F", Object::Integer(3));
    dict.set(
        "DA",
        Object::String(b"/Helv 0.01 Tf 1 1 1 rg".to_vec(), StringFormat::Literal),
    );
    let mut bs = Dictionary::new();
    bs.set("W", Object::Integer(0));
    dict.set("BS", Object::Dictionary(bs));
    dict
}

fn append_annotation(document: &mut Document, page_id: ObjectId, annot_id: ObjectId) {
    let Ok(page) = document.get_object_mut(page_id).and_then(Object::as_dict_mut) else {
        return;
    };
    if let Ok(Object::Array(arr)) = page.get_mut(b"Annots") {
        arr.push(Object::Reference(annot_id));
        return;
    }
    page.set("Annots", Object::Array(vec![Object::Reference(annot_id)]));
}

#[derive(Debug, Clone)]
pub struct PdfEmbedInfo {
    pub embedding_method: &'static str,
    pub pages: usize,
    pub payload_hex: String,
}

/// Embed the watermark into a PDF's bytes. Fails only if `pdf_bytes` cannot
/// be parsed as a PDF at all (spec.md §7 "hard decode failures").
pub fn embed(
    pdf_bytes: &[u8],
    key: &SecretKey,
    model_name: Option<&str>,
    timestamp_iso: Option<&str>,
    context: Option<&str>,
) -> Result<(Vec<u8>, PdfEmbedInfo), CodecError> {
    let mut document = Document::load_mem(pdf_bytes).map_err(|e| CodecError::Pdf(e.to_string()))?;

    let payload = build_payload(model_name, timestamp_iso, key, context);
    let payload_hex = hex::encode(&payload);
    let zw_text = encode_bits(&to_bits(&payload));

    // Layer 1: custom metadata entry, hex-encoded.
    let info_id = get_or_create_info(&mut document);
    if let Ok(info) = document.get_object_mut(info_id).and_then(Object::as_dict_mut) {
        info.set(META_KEY, Object::String(payload_hex.as_bytes().to_vec(), StringFormat::Literal));
        // Layer 2: /Keywords, zero-width encoded.
        info.set("Keywords", Object::String(zw_text.as_bytes().to_vec(), StringFormat::Literal));
    }

    // Layer 3: a hidden FreeText annotation on every page.
    let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
    let pages = page_ids.len();
    for page_id in page_ids {
        let annot_id = document.add_object(hidden_annotation(&zw_text));
        append_annotation(&mut document, page_id, annot_id);
    }

    let mut out = Vec::new();
    document.save_to(&mut out).map_err(|e| CodecError::Pdf(e.to_string()))?;

    Ok((
        out,
        PdfEmbedInfo {
            embedding_method: "pdf_metadata_zw_annotation_triple_layer",
            pages,
            payload_hex,
        },
    ))
}

#[derive(Debug, Clone)]
pub struct PdfVerifyResult {
    pub detected: bool,
    pub confidence: f64,
    pub signature_valid: bool,
    pub model_name: Option<String>,
    pub context: Option<String>,
    pub timestamp_unix: Option<u32>,
    pub wm_id: Option<String>,
    pub source: Option<&'static str>,
}

fn try_from_hex(hex_str: &str, key: &SecretKey) -> Option<crate::payload::ParsedPayload> {
    let bytes = hex::decode(hex_str.trim()).ok()?;
    parse_payload(&bytes, key)
}

fn try_from_zw(zw: &str, key: &SecretKey) -> Option<crate::payload::ParsedPayload> {
    let bits = decode_to_bits(zw);
    if bits.len() < PAYLOAD_BITS {
        return None;
    }
    parse_payload(&crate::payload::from_bits(&bits), key)
}

/// Verify: tries metadata `/WM_PAYLOAD`, then `/Keywords`, then every
/// page's hidden `FreeText` annotations — first valid HMAC wins.
pub fn verify(pdf_bytes: &[u8], key: &SecretKey) -> Result<PdfVerifyResult, CodecError> {
    let document = Document::load_mem(pdf_bytes).map_err(|e| CodecError::Pdf(e.to_string()))?;

    let mut result = PdfVerifyResult {
        detected: false,
        confidence: 0.0,
        signature_valid: false,
        model_name: None,
        context: None,
        timestamp_unix: None,
        wm_id: None,
        source: None,
    };

    let mut found = None;
    let mut source = None;

    if let Ok(&Object::Reference(info_id)) = document.trailer.get(b"Info") {
        if let Ok(info) = document.get_dictionary(info_id) {
            if let Ok(value) = info.get(META_KEY).and_then(Object::as_str) {
                if let Some(parsed) = try_from_hex(&String::from_utf8_lossy(value), key) {
                    found = Some(parsed);
                    source = Some("metadata");
                }
            }
            if found.is_none() {
                if let Ok(value) = info.get(b"Keywords").and_then(Object::as_str) {
                    if let Some(parsed) = try_from_zw(&String::from_utf8_lossy(value), key) {
                        found = Some(parsed);
                        source = Some("keywords");
                    }
                }
            }
        }
    }

    if found.is_none() {
        'pages: for (_, page_id) in document.get_pages() {
            for annot_dict in document.get_page_annotations(page_id) {
                let Ok(subtype) = annot_dict.get(b"Subtype").and_then(Object::as_name_str) else {
                    continue;
                };
                if subtype != "FreeText" {
                    continue;
                }
                let Ok(contents) = annot_dict.get(b"Contents").and_then(Object::as_str) else {
                    continue;
                };
                if let Some(parsed) = try_from_zw(&String::from_utf8_lossy(contents), key) {
                    found = Some(parsed);
                    source = Some("annotation");
                    break 'pages;
                }
            }
        }
    }

    if let Some(parsed) = found {
        result.signature_valid = true;
        result.detected = true;
        result.confidence = 0.95;
        result.wm_id = derive_wm_id(parsed.model_name.as_deref(), Some(parsed.timestamp_unix), key);
        result.model_name = parsed.model_name;
        result.context = parsed.context;
        result.timestamp_unix = Some(parsed.timestamp_unix);
        result.source = source;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretKey {
        SecretKey::from_bytes(b"pdf-engine-key".to_vec())
    }

    fn minimal_pdf() -> Vec<u8> {
        let mut document = Document::with_version("1.7");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(Dictionary::new());
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary({
            let mut d = Dictionary::new();
            d.set("F1", Object::Reference(font_id));
            d
        }));
        let content = lopdf::content::Content { operations: vec![] };
        let content_id = document.add_object(lopdf::Stream::new(Dictionary::new(), content.encode().unwrap()));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set("Contents", Object::Reference(content_id));
        page.set("Resources", Object::Dictionary(resources));
        let page_id = document.add_object(page);
        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
        pages.set("Count", Object::Integer(1));
        document.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = document.add_object({
            let mut d = Dictionary::new();
            d.set("Type", Object::Name(b"Catalog".to_vec()));
            d.set("Pages", Object::Reference(pages_id));
            d
        });
        document.trailer.set("Root", Object::Reference(catalog_id));
        let mut out = Vec::new();
        document.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn round_trips_all_three_layers() {
        let k = key();
        let pdf = minimal_pdf();
        let (wm_pdf, info) = embed(&pdf, &k, Some("claude-sonnet-4"), None, Some("legal")).unwrap();
        assert_eq!(info.pages, 1);

        let result = verify(&wm_pdf, &k).unwrap();
        assert!(result.signature_valid, "{:?}", result);
        assert_eq!(result.model_name.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(result.context.as_deref(), Some("legal"));
        assert_eq!(result.source, Some("metadata"));
    }

    #[test]
    fn annotation_layer_survives_metadata_stripping() {
        let k = key();
        let pdf = minimal_pdf();
        let (wm_pdf, _) = embed(&pdf, &k, Some("m"), None, None).unwrap();
        let mut document = Document::load_mem(&wm_pdf).unwrap();
        if let Ok(&Object::Reference(info_id)) = document.trailer.get(b"Info") {
            document.objects.insert(info_id, Object::Dictionary(Dictionary::new()));
        }
        let mut stripped = Vec::new();
        document.save_to(&mut stripped).unwrap();

        let result = verify(&stripped, &k).unwrap();
        assert!(result.signature_valid);
        assert_eq!(result.source, Some("annotation"));
    }

    #[test]
    fn wrong_key_fails_signature() {
        let k = key();
        let other = SecretKey::from_bytes(b"other".to_vec());
        let pdf = minimal_pdf();
        let (wm_pdf, _) = embed(&pdf, &k, Some("m"), None, None).unwrap();
        let result = verify(&wm_pdf, &other).unwrap();
        assert!(!result.signature_valid);
    }
}
