//! Filter-Graph Compiler: turns an edit session's actions into an ffmpeg
//! `-filter_complex` string plus the output stream labels the Export
//! Runner feeds to its subprocess.
//!
//! No single teacher file does this; the accumulate-into-a-`Vec`-then-
//! freeze-into-one-string shape follows the general builder pattern the
//! pack's DAG builder uses for assembling a fixed sequence before handing
//! it to an executor.

use crate::domain::{EditAction, EditActionOptions, EditActionType};

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilterGraph {
    pub filter_complex: String,
    pub video_out_label: String,
    pub audio_out_label: String,
}

/// Compiles a video's edit actions into a filter graph. Stages are emitted
/// in the fixed order cuts → mutes → mosaics → telops, regardless of the
/// actions' storage order, so the same action set always compiles to
/// byte-identical text.
pub fn compile(actions: &[EditAction]) -> CompiledFilterGraph {
    let mut ordered: Vec<&EditAction> = actions
        .iter()
        .filter(|a| a.action_type != EditActionType::Skip)
        .collect();
    ordered.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| type_rank(a.action_type).cmp(&type_rank(b.action_type)))
            .then_with(|| a.id.cmp(&b.id))
    });

    if ordered.is_empty() {
        return CompiledFilterGraph {
            filter_complex: String::new(),
            video_out_label: "0:v".to_string(),
            audio_out_label: "0:a".to_string(),
        };
    }

    let mut filters = Vec::new();
    let mut video_label = "0:v".to_string();
    let mut audio_label = "0:a".to_string();

    // 1. Cuts: one shared boolean window expression applied to both tracks.
    let cut_windows: Vec<(f64, f64)> = ordered
        .iter()
        .filter(|a| a.action_type == EditActionType::Cut)
        .map(|a| (a.start_sec, a.end_sec))
        .collect();
    if !cut_windows.is_empty() {
        let e_cut = cut_windows
            .iter()
            .map(|(s, e)| format!("between(t,{s:.3},{e:.3})"))
            .collect::<Vec<_>>()
            .join("+");
        filters.push(format!("[{video_label}]select='not({e_cut})',setpts=N/FRAME_RATE/TB[vcut]"));
        filters.push(format!("[{audio_label}]aselect='not({e_cut})',asetpts=N/SR/TB[acut]"));
        video_label = "vcut".to_string();
        audio_label = "acut".to_string();
    }

    // 2. Mutes: each mute chains its own volume gate onto the current
    // audio label, in order.
    for (i, action) in ordered.iter().filter(|a| a.action_type == EditActionType::Mute).enumerate() {
        let labeled = format!("a_mute_{i}");
        filters.push(format!(
            "[{audio_label}]volume=0:enable='between(t,{start:.3},{end:.3})'[{labeled}]",
            start = action.start_sec,
            end = action.end_sec,
        ));
        audio_label = labeled;
    }

    // 3. Mosaics: split the video, blur one branch, overlay it back over
    // the untouched branch for the action's time window.
    for (i, action) in ordered.iter().filter(|a| a.action_type == EditActionType::Mosaic).enumerate() {
        let Some(EditActionOptions::Mosaic { x, y, width, height, blur_strength }) = &action.options else {
            continue;
        };
        let base = format!("base_{i}");
        let blur_branch = format!("blur_{i}");
        let blurred = format!("blurred_{i}");
        let composited = format!("v_mosaic_{i}");
        filters.push(format!("[{video_label}]split=2[{base}][{blur_branch}]"));
        filters.push(format!(
            "[{blur_branch}]crop={w}:{h}:{x}:{y},boxblur={blur_strength}:1[{blurred}]",
            w = width.round() as i64,
            h = height.round() as i64,
            x = x.round() as i64,
            y = y.round() as i64,
        ));
        filters.push(format!(
            "[{base}][{blurred}]overlay={x}:{y}:enable='between(t,{start:.3},{end:.3})'[{composited}]",
            x = x.round() as i64,
            y = y.round() as i64,
            start = action.start_sec,
            end = action.end_sec,
        ));
        video_label = composited;
    }

    // 4. Telops: drawtext, in input order, each layering onto the
    // previous stage's output.
    for (i, action) in ordered.iter().filter(|a| a.action_type == EditActionType::Telop).enumerate() {
        let Some(EditActionOptions::Telop { text, x, y, font_size, font_color, background_color }) = &action.options else {
            continue;
        };
        let labeled = format!("v_telop_{i}");
        let box_clause = match background_color {
            Some(color) => format!(":box=1:boxcolor={}@0.6", escape_drawtext(color)),
            None => String::new(),
        };
        filters.push(format!(
            "[{video_label}]drawtext=text='{text}':x={x}:y={y}:fontsize={size}:fontcolor={color}{boxc}:enable='between(t,{start:.3},{end:.3})'[{labeled}]",
            text = escape_drawtext(text),
            x = x.round() as i64,
            y = y.round() as i64,
            size = font_size.round() as i64,
            color = escape_drawtext(font_color),
            boxc = box_clause,
            start = action.start_sec,
            end = action.end_sec,
        ));
        video_label = labeled;
    }

    CompiledFilterGraph {
        filter_complex: filters.join(";"),
        video_out_label: video_label,
        audio_out_label: audio_label,
    }
}

fn type_rank(t: EditActionType) -> u8 {
    match t {
        EditActionType::Cut => 0,
        EditActionType::Mute => 1,
        EditActionType::Mosaic => 2,
        EditActionType::Telop => 3,
        EditActionType::Skip => 4,
    }
}

/// Escapes ffmpeg drawtext's special characters: backslash, colon, single
/// quote, and newline. Percent is escaped too, though the spec doesn't
/// require it — ffmpeg's drawtext otherwise reads `%{...}` as a strftime
/// expansion token.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
        .replace('%', "\\%")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str, action_type: EditActionType, start: f64, end: f64, options: Option<EditActionOptions>) -> EditAction {
        EditAction {
            id: id.to_string(),
            session_id: "s1".to_string(),
            action_type,
            start_sec: start,
            end_sec: end,
            risk_item_id: None,
            options,
        }
    }

    #[test]
    fn no_actions_produce_an_empty_filter_complex() {
        let graph = compile(&[]);
        assert_eq!(graph.filter_complex, "");
        assert_eq!(graph.video_out_label, "0:v");
        assert_eq!(graph.audio_out_label, "0:a");
    }

    #[test]
    fn skip_actions_contribute_nothing() {
        let a = action("1", EditActionType::Skip, 1.0, 2.0, None);
        let graph = compile(&[a]);
        assert_eq!(graph.filter_complex, "");
    }

    #[test]
    fn cuts_compile_to_a_shared_select_expression_with_fixed_point_times() {
        let a = action("1", EditActionType::Cut, 2.0, 4.0, None);
        let b = action("2", EditActionType::Cut, 6.0, 7.5, None);
        let graph = compile(&[a, b]);
        assert!(graph
            .filter_complex
            .contains("select='not(between(t,2.000,4.000)+between(t,6.000,7.500))',setpts=N/FRAME_RATE/TB[vcut]"));
        assert!(graph
            .filter_complex
            .contains("aselect='not(between(t,2.000,4.000)+between(t,6.000,7.500))',asetpts=N/SR/TB[acut]"));
        assert_eq!(graph.video_out_label, "vcut");
        assert_eq!(graph.audio_out_label, "acut");
    }

    #[test]
    fn mute_emits_a_volume_gate_with_fixed_point_enable_window() {
        let mute = action("1", EditActionType::Mute, 3.0, 5.0, None);
        let graph = compile(&[mute]);
        assert!(graph.filter_complex.contains("volume=0:enable='between(t,3.000,5.000)'"));
    }

    #[test]
    fn multiple_mutes_chain_in_order() {
        let a = action("1", EditActionType::Mute, 1.0, 2.0, None);
        let b = action("2", EditActionType::Mute, 3.0, 4.0, None);
        let graph = compile(&[a, b]);
        assert!(graph.filter_complex.contains("[0:a]volume=0:enable='between(t,1.000,2.000)'[a_mute_0]"));
        assert!(graph.filter_complex.contains("[a_mute_0]volume=0:enable='between(t,3.000,4.000)'[a_mute_1]"));
        assert_eq!(graph.audio_out_label, "a_mute_1");
    }

    #[test]
    fn mosaic_splits_crops_blurs_then_overlays() {
        let mosaic = action(
            "1",
            EditActionType::Mosaic,
            0.0,
            1.0,
            Some(EditActionOptions::Mosaic { x: 10.0, y: 10.0, width: 100.0, height: 50.0, blur_strength: 8 }),
        );
        let graph = compile(&[mosaic]);
        assert!(graph.filter_complex.contains("split=2[base_0][blur_0]"));
        assert!(graph.filter_complex.contains("crop=100:50:10:10,boxblur=8:1[blurred_0]"));
        assert!(graph
            .filter_complex
            .contains("overlay=10:10:enable='between(t,0.000,1.000)'[v_mosaic_0]"));
        assert_eq!(graph.video_out_label, "v_mosaic_0");
    }

    #[test]
    fn telop_text_is_escaped_for_drawtext_including_newline() {
        let telop = action(
            "1",
            EditActionType::Telop,
            0.0,
            1.0,
            Some(EditActionOptions::Telop {
                text: "50% off:\n'today'".to_string(),
                x: 0.0,
                y: 0.0,
                font_size: 24.0,
                font_color: "white".to_string(),
                background_color: None,
            }),
        );
        let graph = compile(&[telop]);
        assert!(graph.filter_complex.contains("50\\% off\\:\\n\\'today\\'"));
    }

    #[test]
    fn stage_order_is_cuts_then_mutes_then_mosaics_then_telops() {
        let cut = action("1", EditActionType::Cut, 0.0, 1.0, None);
        let mute = action("2", EditActionType::Mute, 2.0, 3.0, None);
        let mosaic = action(
            "3",
            EditActionType::Mosaic,
            4.0,
            5.0,
            Some(EditActionOptions::Mosaic { x: 10.0, y: 10.0, width: 10.0, height: 10.0, blur_strength: 8 }),
        );
        let telop = action(
            "4",
            EditActionType::Telop,
            6.0,
            7.0,
            Some(EditActionOptions::Telop {
                text: "hi".to_string(),
                x: 0.0,
                y: 0.0,
                font_size: 10.0,
                font_color: "white".to_string(),
                background_color: None,
            }),
        );
        let graph = compile(&[telop, mosaic, mute, cut]);
        let select_idx = graph.filter_complex.find("select=").unwrap();
        let volume_idx = graph.filter_complex.find("volume=0").unwrap();
        let split_idx = graph.filter_complex.find("split=2").unwrap();
        let drawtext_idx = graph.filter_complex.find("drawtext=").unwrap();
        assert!(select_idx < volume_idx);
        assert!(volume_idx < split_idx);
        assert!(split_idx < drawtext_idx);
    }

    #[test]
    fn compiling_the_same_action_set_twice_is_byte_identical() {
        let actions = vec![
            action("b", EditActionType::Cut, 5.0, 6.0, None),
            action("a", EditActionType::Mute, 1.0, 2.0, None),
        ];
        let g1 = compile(&actions);
        let g2 = compile(&actions);
        assert_eq!(g1, g2);
    }
}
