//! Tests for comfyrelay-core: graph model, mutation engine, protocol, config, errors

use comfyrelay_core::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::collections::HashSet;

fn sample_template() -> Value {
    json!({
        "3": {
            "class_type": "KSampler",
            "inputs": {
                "cfg": 8,
                "denoise": 1,
                "latent_image": ["5", 0],
                "model": ["4", 0],
                "negative": ["7", 0],
                "positive": ["6", 0],
                "sampler_name": "euler",
                "scheduler": "normal",
                "seed": 8566257,
                "steps": 20
            }
        },
        "4": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "v1-5-pruned-emaonly.ckpt" }
        },
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": { "batch_size": 1, "height": 512, "width": 512 }
        },
        "6": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "POSITIVE_PROMPT_PLACEHOLDER" }
        },
        "7": {
            "class_type": "CLIPTextEncode",
            "inputs": { "clip": ["4", 1], "text": "NEGATIVE_PROMPT_PLACEHOLDER" }
        },
        "8": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
        },
        "9": {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": "ComfyUI", "images": ["8", 0] },
            "_meta": { "title": "Save Image" }
        }
    })
}

fn load(value: Value) -> GraphTemplate {
    GraphTemplate::from_value(value).unwrap()
}

fn input(graph: &GraphTemplate, node: &str, field: &str) -> Value {
    graph.node(node).unwrap().input(field).unwrap().to_value()
}

// ===========================================================================
// GraphTemplate loading
// ===========================================================================

#[test]
fn load_classifies_nodes_and_auxiliary_fields() {
    let mut raw = sample_template();
    raw["input_image"] = json!("aGVsbG8=");
    raw["input_image_name"] = json!("cat.png");
    let graph = load(raw);

    assert_eq!(graph.node_count(), 7);
    assert_eq!(graph.len(), 9);
    assert!(graph.has_auxiliary());
    assert_eq!(graph.auxiliary("input_image_name"), Some(&json!("cat.png")));
    assert!(graph.node("input_image").is_none());
    assert_eq!(graph.node("3").unwrap().kind(), &NodeKind::KSampler);
    assert_eq!(
        graph.node("9").unwrap().kind(),
        &NodeKind::Other("SaveImage".into())
    );
}

#[test]
fn load_recognizes_links() {
    let graph = load(sample_template());
    match graph.node("3").unwrap().input("model").unwrap() {
        InputValue::Link(link) => {
            assert_eq!(link.node, "4");
            assert_eq!(link.slot, 0);
        }
        other => panic!("Expected Link, got {:?}", other),
    }
    assert!(graph.node("3").unwrap().scalar("seed").is_some());
}

#[test]
fn load_rejects_non_object_top_level() {
    for source in ["[1, 2]", "\"text\"", "42", "null"] {
        match GraphTemplate::from_json_str(source) {
            Err(Error::MalformedTemplate(_)) => {}
            other => panic!("Expected MalformedTemplate for {}, got {:?}", source, other),
        }
    }
}

#[test]
fn load_rejects_invalid_json() {
    let err = GraphTemplate::from_json_str("{ not json").unwrap_err();
    assert_eq!(err.kind(), "malformed_template");
}

#[test]
fn load_rejects_ill_shaped_nodes() {
    let bad_inputs = json!({ "1": { "class_type": "KSampler", "inputs": [1, 2] } });
    assert!(matches!(
        GraphTemplate::from_value(bad_inputs),
        Err(Error::MalformedTemplate(_))
    ));

    let bad_type = json!({ "1": { "class_type": 7, "inputs": {} } });
    assert!(matches!(
        GraphTemplate::from_value(bad_type),
        Err(Error::MalformedTemplate(_))
    ));

    let missing_inputs = json!({ "1": { "class_type": "KSampler" } });
    assert!(matches!(
        GraphTemplate::from_value(missing_inputs),
        Err(Error::MalformedTemplate(_))
    ));
}

#[test]
fn round_trip_without_mutation_is_structurally_equal() {
    let raw = sample_template();
    let graph = load(raw.clone());
    assert_eq!(graph.to_value(), raw);

    let text = serde_json::to_string(&graph).unwrap();
    let reparsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(reparsed, raw);
}

#[test]
fn round_trip_keeps_node_key_order() {
    let source = r#"{"3":{"class_type":"KSampler","inputs":{"seed":1,"steps":4},"_meta":{"title":"K"}},"9":{"_meta":{"title":"S"},"inputs":{"images":["3",0]},"class_type":"SaveImage"}}"#;
    let mut graph = GraphTemplate::from_json_str(source).unwrap();
    assert_eq!(serde_json::to_string(&graph).unwrap(), source);

    MutationEngine::new()
        .with(Patch::Seed(SeedChoice::Fixed(2)))
        .apply(&mut graph);
    assert_eq!(
        serde_json::to_string(&graph.to_prompt()).unwrap(),
        source.replace(r#""seed":1"#, r#""seed":2"#)
    );
}

#[test]
fn round_trip_preserves_unknown_fields() {
    let raw = json!({
        "12": {
            "class_type": "SomeCustomNode",
            "inputs": { "mode": "fancy", "weights": [0.1, 0.2, 0.3], "opts": { "a": 1 } },
            "_meta": { "title": "custom" },
            "is_changed": ["x"]
        },
        "notes": { "author": "someone" }
    });
    let graph = load(raw.clone());
    assert_eq!(graph.to_value(), raw);
    assert_eq!(graph.node_count(), 1);
    assert!(graph.auxiliary("notes").is_some());
}

#[test]
fn to_prompt_drops_auxiliary_fields() {
    let mut raw = sample_template();
    raw["input_image"] = json!("aGVsbG8=");
    let graph = load(raw);
    let prompt = graph.to_prompt();
    assert!(prompt.get("input_image").is_none());
    assert_eq!(prompt.as_object().unwrap().len(), 7);
    assert_eq!(prompt, sample_template());
}

#[test]
fn take_auxiliary_never_removes_nodes() {
    let mut raw = sample_template();
    raw["input_image"] = json!("abc");
    let mut graph = load(raw);
    assert!(graph.take_auxiliary("3").is_none());
    assert!(graph.node("3").is_some());
    assert_eq!(graph.take_auxiliary("input_image"), Some(json!("abc")));
    assert!(graph.auxiliary("input_image").is_none());
}

#[test]
fn graph_template_deserializes_via_serde() {
    let graph: GraphTemplate = serde_json::from_value(sample_template()).unwrap();
    assert_eq!(graph.node_count(), 7);
    assert!(serde_json::from_value::<GraphTemplate>(json!([1])).is_err());
}

// ===========================================================================
// MutationEngine: no-op invariant
// ===========================================================================

#[test]
fn patches_without_matching_nodes_are_no_ops() {
    let raw = json!({
        "8": { "class_type": "VAEDecode", "inputs": { "samples": ["3", 0], "vae": ["4", 2] } },
        "9": { "class_type": "SaveImage", "inputs": { "filename_prefix": "x", "images": ["8", 0] } },
        "input_image_name": "keep-me.png"
    });
    let mut graph = load(raw.clone());
    let before = serde_json::to_string(&graph).unwrap();

    let engine = MutationEngine::new()
        .with(Patch::Seed(SeedChoice::Random))
        .with(Patch::Canvas { width: 64, height: 64 })
        .with(Patch::Sampler(SamplerSettings::default()))
        .with(Patch::PromptText { positive: "p".into(), negative: "n".into() })
        .with(Patch::Checkpoint("model.safetensors".into()))
        .with(Patch::InputImage("in.png".into()));
    let report = engine.apply(&mut graph);

    assert_eq!(report.patched_nodes, 0);
    assert_eq!(serde_json::to_string(&graph).unwrap(), before);
    assert_eq!(graph.to_value(), raw);
}

#[test]
fn patches_never_touch_links() {
    let raw = json!({
        "3": {
            "class_type": "KSampler",
            "inputs": { "seed": ["10", 0], "steps": 20, "cfg": ["11", 0] }
        },
        "5": { "class_type": "EmptyLatentImage", "inputs": { "width": ["12", 0], "height": 512 } }
    });
    let mut graph = load(raw);
    MutationEngine::new()
        .with(Patch::Seed(SeedChoice::Fixed(1)))
        .with(Patch::Sampler(SamplerSettings::default()))
        .with(Patch::Canvas { width: 256, height: 256 })
        .apply(&mut graph);

    assert_eq!(input(&graph, "3", "seed"), json!(["10", 0]));
    assert_eq!(input(&graph, "3", "cfg"), json!(["11", 0]));
    assert_eq!(input(&graph, "3", "steps"), json!(20));
    assert_eq!(input(&graph, "5", "width"), json!(["12", 0]));
    assert_eq!(input(&graph, "5", "height"), json!(256));
}

// ===========================================================================
// Seed assignment
// ===========================================================================

#[test]
fn fixed_seed_is_written_verbatim() {
    for _ in 0..10 {
        let mut graph = load(sample_template());
        MutationEngine::new()
            .with(Patch::Seed(SeedChoice::Fixed(9_999_999_999)))
            .apply(&mut graph);
        assert_eq!(input(&graph, "3", "seed"), json!(9_999_999_999u64));
    }
}

#[test]
fn random_seed_is_spread_over_range() {
    let engine = MutationEngine::new().with(Patch::Seed(SeedChoice::Random));
    let mut rng = StdRng::seed_from_u64(7);
    let mut seen = HashSet::new();
    let mut below_half = 0;

    for _ in 0..1000 {
        let mut graph = load(sample_template());
        engine.apply_with_rng(&mut graph, &mut rng);
        let seed = input(&graph, "3", "seed").as_i64().unwrap();
        assert!(seed < SEED_RANGE_END);
        if seed < SEED_RANGE_END / 2 {
            below_half += 1;
        }
        seen.insert(seed);
    }

    assert!(seen.len() > 990, "only {} distinct seeds", seen.len());
    assert!((350..650).contains(&below_half), "skewed: {}", below_half);
}

#[test]
fn seed_requires_seed_field() {
    let raw = json!({ "3": { "class_type": "KSampler", "inputs": { "steps": 4 } } });
    let mut graph = load(raw.clone());
    MutationEngine::new()
        .with(Patch::Seed(SeedChoice::Fixed(5)))
        .apply(&mut graph);
    assert_eq!(graph.to_value(), raw);
}

#[test]
fn seed_choice_from_option() {
    assert_eq!(SeedChoice::from(None), SeedChoice::Random);
    assert_eq!(SeedChoice::from(Some(12)), SeedChoice::Fixed(12));
}

// ===========================================================================
// Canvas, sampler, text, checkpoint, input image
// ===========================================================================

#[test]
fn canvas_applies_to_both_latent_kinds() {
    let mut raw = sample_template();
    raw["13"] = json!({
        "class_type": "EmptySD3LatentImage",
        "inputs": { "width": 1024, "height": 1024, "batch_size": 1 }
    });
    let mut graph = load(raw);
    let report = MutationEngine::new()
        .with(Patch::Canvas { width: 768, height: 512 })
        .apply(&mut graph);

    assert_eq!(report.patched_nodes, 2);
    for id in ["5", "13"] {
        assert_eq!(input(&graph, id, "width"), json!(768));
        assert_eq!(input(&graph, id, "height"), json!(512));
        assert_eq!(input(&graph, id, "batch_size"), json!(1));
    }
}

#[test]
fn sampler_settings_written_together() {
    let mut graph = load(sample_template());
    MutationEngine::new()
        .with(Patch::Sampler(SamplerSettings {
            steps: 30,
            denoise: 0.75,
            cfg: 6.5,
            sampler_name: "dpmpp_2m".into(),
        }))
        .apply(&mut graph);

    assert_eq!(input(&graph, "3", "steps"), json!(30));
    assert_eq!(input(&graph, "3", "denoise"), json!(0.75));
    assert_eq!(input(&graph, "3", "cfg"), json!(6.5));
    assert_eq!(input(&graph, "3", "sampler_name"), json!("dpmpp_2m"));
    assert_eq!(input(&graph, "3", "scheduler"), json!("normal"));
}

#[test]
fn sampler_gated_on_steps_field() {
    let raw = json!({
        "3": { "class_type": "KSampler", "inputs": { "seed": 1, "cfg": 8 } }
    });
    let mut graph = load(raw.clone());
    MutationEngine::new()
        .with(Patch::Sampler(SamplerSettings::default()))
        .apply(&mut graph);
    assert_eq!(graph.to_value(), raw);
}

#[test]
fn text_substitution_only_replaces_placeholders() {
    let mut raw = sample_template();
    raw["10"] = json!({
        "class_type": "CLIPTextEncode",
        "inputs": { "clip": ["4", 1], "text": "watercolor, soft light" }
    });
    let mut graph = load(raw);
    let engine = MutationEngine::new().with(Patch::PromptText {
        positive: "a red fox".into(),
        negative: "blurry".into(),
    });
    engine.apply(&mut graph);

    assert_eq!(input(&graph, "6", "text"), json!("a red fox"));
    assert_eq!(input(&graph, "7", "text"), json!("blurry"));
    assert_eq!(input(&graph, "10", "text"), json!("watercolor, soft light"));

    // Placeholders are gone, so a second pass changes nothing.
    let snapshot = graph.to_value();
    let report = MutationEngine::new()
        .with(Patch::PromptText { positive: "other".into(), negative: "other".into() })
        .apply(&mut graph);
    assert_eq!(report.patched_nodes, 0);
    assert_eq!(graph.to_value(), snapshot);
}

#[test]
fn text_substitution_ignores_near_miss_placeholder() {
    let raw = json!({
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "POSITIVE_PROMPT_PLACEHOLDER " } },
        "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "negative_prompt_placeholder" } }
    });
    let mut graph = load(raw.clone());
    MutationEngine::new()
        .with(Patch::PromptText { positive: "x".into(), negative: "y".into() })
        .apply(&mut graph);
    assert_eq!(graph.to_value(), raw);
}

#[test]
fn text_substitution_accepts_legacy_positive_spelling() {
    let raw = json!({
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": LEGACY_POSITIVE_PROMPT_PLACEHOLDER } },
        "7": { "class_type": "CLIPTextEncode", "inputs": { "text": NEGATIVE_PROMPT_PLACEHOLDER } }
    });
    let mut graph = load(raw);
    let report = MutationEngine::new()
        .with(Patch::PromptText { positive: "red barn".into(), negative: "blurry".into() })
        .apply(&mut graph);
    assert_eq!(report.patched_nodes, 2);
    assert_eq!(input(&graph, "6", "text"), json!("red barn"));
    assert_eq!(input(&graph, "7", "text"), json!("blurry"));
}

#[test]
fn checkpoint_and_input_image_overrides() {
    let mut raw = sample_template();
    raw["20"] = json!({ "class_type": "LoadImage", "inputs": { "image": "example.png", "upload": "image" } });
    let mut graph = load(raw);
    MutationEngine::new()
        .with(Patch::Checkpoint("sd_xl_base_1.0.safetensors".into()))
        .with(Patch::InputImage("input1.png".into()))
        .apply(&mut graph);

    assert_eq!(input(&graph, "4", "ckpt_name"), json!("sd_xl_base_1.0.safetensors"));
    assert_eq!(input(&graph, "20", "image"), json!("input1.png"));
    assert_eq!(input(&graph, "20", "upload"), json!("image"));
}

// ===========================================================================
// JobParams
// ===========================================================================

#[test]
fn job_params_defaults() {
    let params: JobParams = serde_json::from_value(json!({ "positive_prompt": "hill happy dog" })).unwrap();
    assert_eq!(params.prompt_file, "SDXL.json");
    assert_eq!(params.negative_prompt, "");
    assert_eq!(params.seed, None);
    assert_eq!((params.width, params.height), (1024, 1024));
    assert_eq!(params.steps, 20);
    assert_eq!(params.denoise, 1.0);
    assert_eq!(params.cfg, 8.0);
    assert_eq!(params.sampler_name, "euler");
    assert!(params.tensors_file_name.is_none());
}

#[test]
fn job_params_requires_positive_prompt() {
    assert!(serde_json::from_value::<JobParams>(json!({ "width": 512 })).is_err());
}

#[test]
fn job_params_coerce_integers() {
    let params: JobParams = serde_json::from_value(json!({
        "positive_prompt": "x",
        "width": "768",
        "height": 512.9,
        "seed": "123",
        "steps": 25.0
    }))
    .unwrap();
    assert_eq!(params.width, 768);
    assert_eq!(params.height, 512);
    assert_eq!(params.seed, Some(123));
    assert_eq!(params.steps, 25);

    let null_seed: JobParams =
        serde_json::from_value(json!({ "positive_prompt": "x", "seed": null })).unwrap();
    assert_eq!(null_seed.seed, None);

    assert!(serde_json::from_value::<JobParams>(json!({ "positive_prompt": "x", "width": "wide" })).is_err());
    assert!(serde_json::from_value::<JobParams>(json!({ "positive_prompt": "x", "height": -4 })).is_err());
}

#[test]
fn job_params_pass_negative_seed_through() {
    let params: JobParams =
        serde_json::from_value(json!({ "positive_prompt": "a", "seed": -1 })).unwrap();
    assert_eq!(params.seed, Some(-1));
    let from_string: JobParams =
        serde_json::from_value(json!({ "positive_prompt": "a", "seed": "-42" })).unwrap();
    assert_eq!(from_string.seed, Some(-42));
    assert!(serde_json::from_value::<JobParams>(json!({ "positive_prompt": "a", "seed": "soon" })).is_err());

    let mut graph = load(sample_template());
    MutationEngine::from_params(&params).apply(&mut graph);
    assert_eq!(input(&graph, "3", "seed"), json!(-1));
}

#[test]
fn job_params_accept_empty_positive_prompt() {
    let params: JobParams = serde_json::from_value(json!({ "positive_prompt": "" })).unwrap();
    assert_eq!(params.positive_prompt, "");
}

#[test]
fn engine_from_params_applies_everything() {
    let mut params = JobParams::new("a lighthouse at dusk");
    params.negative_prompt = "lowres".into();
    params.seed = Some(42);
    params.width = 640;
    params.height = 480;
    params.steps = 12;
    params.tensors_file_name = Some("juggernaut.safetensors".into());

    let mut graph = load(sample_template());
    let engine = MutationEngine::from_params(&params);
    assert_eq!(engine.patches().len(), 5);
    engine.apply(&mut graph);

    assert_eq!(input(&graph, "3", "seed"), json!(42));
    assert_eq!(input(&graph, "3", "steps"), json!(12));
    assert_eq!(input(&graph, "4", "ckpt_name"), json!("juggernaut.safetensors"));
    assert_eq!(input(&graph, "5", "width"), json!(640));
    assert_eq!(input(&graph, "5", "height"), json!(480));
    assert_eq!(input(&graph, "6", "text"), json!("a lighthouse at dusk"));
    assert_eq!(input(&graph, "7", "text"), json!("lowres"));
}

#[test]
fn engine_from_params_skips_absent_overrides() {
    let params = JobParams::new("x");
    let engine = MutationEngine::from_params(&params);
    assert!(!engine
        .patches()
        .iter()
        .any(|p| matches!(p, Patch::Checkpoint(_) | Patch::InputImage(_))));

    let mut graph = load(sample_template());
    engine.apply(&mut graph);
    assert_eq!(input(&graph, "4", "ckpt_name"), json!("v1-5-pruned-emaonly.ckpt"));
}

#[test]
fn engine_from_params_defers_embedded_image_name() {
    let mut params = JobParams::new("x");
    params.input_image_name = Some("stored.png".into());
    assert!(MutationEngine::from_params(&params)
        .patches()
        .contains(&Patch::InputImage("stored.png".into())));

    params.input_image = Some("aGVsbG8=".into());
    assert!(!MutationEngine::from_params(&params)
        .patches()
        .iter()
        .any(|p| matches!(p, Patch::InputImage(_))));
}

// ===========================================================================
// Protocol
// ===========================================================================

#[test]
fn completion_requires_matching_submission() {
    let x = SubmissionId::new("X");
    let frames = [
        Frame::Text(ProgressEvent::executing(Some("5"), "X").to_text()),
        Frame::Text(ProgressEvent::executing(None, "Y").to_text()),
        Frame::Text(ProgressEvent::executing(None, "X").to_text()),
    ];
    let first = frames.iter().position(|f| f.completes(&x));
    assert_eq!(first, Some(2));
}

#[test]
fn completion_ignores_other_events_and_binary() {
    let x = SubmissionId::new("X");
    assert!(!Frame::Binary(vec![0, 1, 2]).completes(&x));
    assert!(!Frame::Text("not json".into()).completes(&x));
    assert!(!Frame::Text(r#"{"type":"status","data":{"node":null,"prompt_id":"X"}}"#.into()).completes(&x));
    assert!(!Frame::Text(r#"{"type":"executing","data":{"prompt_id":"X","node":"9"}}"#.into()).completes(&x));
    assert!(Frame::Text(r#"{"type":"executing","data":{"prompt_id":"X"}}"#.into()).completes(&x));
}

#[test]
fn enqueue_request_envelope_shape() {
    let prompt = json!({ "1": { "class_type": "A", "inputs": {} } });
    let body = serde_json::to_value(EnqueueRequest { prompt: &prompt, client_id: "abc" }).unwrap();
    assert_eq!(body, json!({ "prompt": prompt, "client_id": "abc" }));
}

#[test]
fn enqueue_response_node_errors() {
    let ok: EnqueueResponse =
        serde_json::from_value(json!({ "prompt_id": "p1", "number": 3, "node_errors": {} })).unwrap();
    assert_eq!(ok.prompt_id, "p1");
    assert!(!ok.has_node_errors());

    let bad: EnqueueResponse =
        serde_json::from_value(json!({ "prompt_id": "p2", "node_errors": { "3": "bad" } })).unwrap();
    assert!(bad.has_node_errors());
}

#[test]
fn history_collects_every_output_node_in_order() {
    let body = json!({
        "abc": {
            "outputs": {
                "19": { "images": [ { "filename": "b.png", "subfolder": "", "type": "output" } ] },
                "12": { "text": ["ignored"] },
                "9":  { "images": [
                    { "filename": "a1.png", "subfolder": "s", "type": "output" },
                    { "filename": "a2.png", "subfolder": "s", "type": "temp" }
                ] }
            },
            "status": { "completed": true }
        }
    });
    let entry = HistoryEntry::from_history_body(body, &SubmissionId::new("abc"))
        .unwrap()
        .unwrap();
    let names: Vec<String> = entry.artifact_refs().into_iter().map(|r| r.filename).collect();
    assert_eq!(names, vec!["b.png", "a1.png", "a2.png"]);
    assert_eq!(entry.artifact_refs()[2].store_class, "temp");
}

#[test]
fn history_missing_submission_is_none() {
    let entry = HistoryEntry::from_history_body(json!({}), &SubmissionId::new("zzz")).unwrap();
    assert!(entry.is_none());
    assert!(HistoryEntry::from_history_body(json!([]), &SubmissionId::new("zzz")).is_err());
}

#[test]
fn upload_receipt_stored_path() {
    let flat: UploadReceipt =
        serde_json::from_value(json!({ "name": "input1.png", "subfolder": "", "type": "input" })).unwrap();
    assert_eq!(flat.stored_path(), "input1.png");
    let nested = UploadReceipt { name: "a.png".into(), subfolder: "jobs".into(), store_class: "input".into() };
    assert_eq!(nested.stored_path(), "jobs/a.png");
}

#[test]
fn artifact_ref_wire_names() {
    let r: ArtifactRef = serde_json::from_value(json!({ "filename": "x.png", "subfolder": "", "type": "output" })).unwrap();
    assert_eq!(r, ArtifactRef::new("x.png"));
    assert_eq!(serde_json::to_value(&r).unwrap()["type"], "output");
}

#[test]
fn content_type_essence() {
    assert_eq!(essence_of("image/PNG; charset=binary"), "image/png");
    assert_eq!(essence_of(" image/jpeg "), "image/jpeg");
    assert!(Artifact::new(vec![1], "IMAGE/PNG").is_png());
}

// ===========================================================================
// Types
// ===========================================================================

#[test]
fn session_ids_are_unique() {
    let a = SessionId::generate();
    let b = SessionId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 36);
}

#[test]
fn submission_keeps_graph_snapshot() {
    let graph = json!({ "1": { "class_type": "A", "inputs": {} } });
    let sub = Submission::new(SubmissionId::new("p1"), graph.clone());
    assert_eq!(sub.id().as_str(), "p1");
    assert_eq!(sub.graph(), &graph);
}

// ===========================================================================
// Config
// ===========================================================================

#[test]
fn config_defaults() {
    let config = RelayConfig::default();
    assert_eq!(config.engine_address, "127.0.0.1:8188");
    assert_eq!(config.jpeg_quality, 90);
    assert_eq!(config.response_mode, ResponseMode::Envelope);
    assert_eq!(config.engine_ws_url(), "ws://127.0.0.1:8188/ws");
    assert_eq!(config.engine_http_url(), "http://127.0.0.1:8188");
}

#[test]
fn config_env_overrides() {
    let env = |key: &str| match key {
        "JPEG_QUALITY" => Some("250".to_string()),
        "DEBUG_HEADER" => Some("T".to_string()),
        "COMFYUI_ADDRESS" => Some("comfy:9000".to_string()),
        "COMFYRELAY_RESPONSE_MODE" => Some("body".to_string()),
        _ => None,
    };
    let config = RelayConfig::default().with_env(env).unwrap();
    assert_eq!(config.jpeg_quality, 100);
    assert!(config.debug_headers);
    assert_eq!(config.engine_address, "comfy:9000");
    assert_eq!(config.response_mode, ResponseMode::Body);
}

#[test]
fn config_env_rejects_garbage() {
    let env = |key: &str| (key == "JPEG_QUALITY").then(|| "high".to_string());
    assert!(matches!(RelayConfig::default().with_env(env), Err(Error::Config(_))));
}

#[test]
fn config_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    std::fs::write(
        &path,
        "engine_address = \"10.0.0.5:8188\"\njpeg_quality = 75\nresponse_mode = \"body\"\n",
    )
    .unwrap();
    let config = RelayConfig::load(&path).unwrap();
    assert_eq!(config.engine_address, "10.0.0.5:8188");
    assert_eq!(config.jpeg_quality, 75);
    assert_eq!(config.response_mode, ResponseMode::Body);
    assert_eq!(config.wait_timeout_secs, 900);

    let missing = RelayConfig::load(&dir.path().join("nope.toml")).unwrap();
    assert_eq!(missing, RelayConfig::default());
}

#[test]
fn config_rejects_zero_timeout() {
    assert!(RelayConfig::from_toml("wait_timeout_secs = 0").is_err());
}

// ===========================================================================
// Error
// ===========================================================================

#[test]
fn error_display_and_kind() {
    let err = Error::artifact_unresolvable("a.png", "404 Not Found");
    assert_eq!(err.to_string(), "artifact a.png unresolvable: 404 Not Found");
    assert_eq!(err.kind(), "artifact_unresolvable");
    assert_eq!(Error::ChannelUnavailable("refused".into()).kind(), "channel_unavailable");
    let timeout = Error::TimedOut { submission: "p".into(), secs: 3 };
    assert_eq!(timeout.to_string(), "timed out after 3s waiting for submission p");
}

#[test]
fn error_from_io() {
    let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, Error::Io(_)));
}
