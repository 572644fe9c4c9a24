use std::path::{Path, PathBuf};

use common::{
    detection::{BBox, Detection},
    CANVAS_HEIGHT, CANVAS_WIDTH,
};
use image::RgbImage;
use itertools::izip;
use ndarray::s;
use reqwest::Client;
use simple_error::simple_error;
use tract_onnx::prelude::*;

use crate::{utils::download_file, Error};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// SSD-MobileNet v1 trained on COCO, from the ONNX model zoo.
pub const DEFAULT_MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/object_detection_segmentation/ssd-mobilenetv1/model/ssd_mobilenet_v1_10.onnx";

const DEFAULT_MODEL_FILENAME: &str = "ssd_mobilenet_v1_10.onnx";

/// Object detector over single video frames.
pub trait Detector: Send {
    /// Locate objects in `frame`, most confident first.
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, Error>;
}

/// Where to get the model file from.
#[derive(Clone, Debug)]
pub enum ModelSource {
    Path(PathBuf),
    /// Downloaded once into the user cache directory.
    Url(String),
}

#[derive(Clone, Copy, Debug)]
pub struct SsdParams {
    pub min_score: f32,
    pub max_detections: usize,
    pub width: u32,
    pub height: u32,
}

impl Default for SsdParams {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            max_detections: 20,
            width: CANVAS_WIDTH,
            height: CANVAS_HEIGHT,
        }
    }
}

/// COCO SSD detector run with tract.
///
/// The graph takes a `u8` image tensor `[1, height, width, 3]` and has four outputs:
/// `detection_boxes [1, N, 4]` with normalized `[ymin, xmin, ymax, xmax]`,
/// `detection_classes [1, N]`, `detection_scores [1, N]` and `num_detections [1]`.
pub struct SsdModel {
    model: NnModel,
    outputs: OutputSlots,
    params: SsdParams,
}

/// Position of each SSD output among the graph outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSlots {
    pub boxes: usize,
    pub classes: usize,
    pub scores: usize,
    pub count: usize,
}

impl Default for OutputSlots {
    /// Order of the TensorFlow object detection API exports.
    fn default() -> Self {
        Self {
            boxes: 0,
            classes: 1,
            scores: 2,
            count: 3,
        }
    }
}

impl OutputSlots {
    /// Find the outputs by name, e.g. `detection_boxes:0`.
    ///
    /// Falls back to the default order if the names are not all recognized.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let names: Vec<&str> = names.into_iter().collect();
        let find = |key: &str| names.iter().position(|name| name.contains(key));

        match (
            find("detection_boxes"),
            find("detection_classes"),
            find("detection_scores"),
            find("num_detections"),
        ) {
            (Some(boxes), Some(classes), Some(scores), Some(count)) => Self {
                boxes,
                classes,
                scores,
                count,
            },
            _ => {
                log::warn!("Unrecognized model outputs {names:?}, assuming the default order");
                Self::default()
            }
        }
    }
}

impl SsdModel {
    pub async fn load(source: ModelSource, params: SsdParams) -> Result<Self, Error> {
        let path = match source {
            ModelSource::Path(path) => path,
            ModelSource::Url(url) => get_cached_model(&url).await?,
        };
        log::info!("Loading detection model from {}", path.display());

        let model = tokio::task::spawn_blocking(move || {
            get_ssd_model(&path, params.width, params.height)
        })
        .await??;

        let graph = model.model();
        let names = graph
            .output_outlets()?
            .iter()
            .map(|outlet| graph.outlet_label(*outlet).unwrap_or(&graph.node(outlet.node).name))
            .collect::<Vec<_>>();
        let outputs = OutputSlots::from_names(names.iter().copied());
        log::info!("Detection model ready, outputs {names:?}");

        Ok(Self {
            model,
            outputs,
            params,
        })
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let (width, height) = (self.params.width, self.params.height);
        let resized;
        let input = if frame.dimensions() == (width, height) {
            frame
        } else {
            resized = image::imageops::resize(
                frame,
                width,
                height,
                image::imageops::FilterType::Triangle,
            );
            &resized
        };

        tract_ndarray::Array4::from_shape_fn(
            (1, height as usize, width as usize, 3),
            |(_, y, x, c)| input[(x as _, y as _)][c],
        )
        .into()
    }
}

impl Detector for SsdModel {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, Error> {
        let input = self.preproc(frame);
        let outputs = self.model.run(tvec!(input.into()))?;
        decode_outputs(&outputs[..], self.outputs, &self.params, frame.dimensions())
    }
}

/// Decode the four SSD output tensors into labelled pixel-space detections.
///
/// Only the first `num_detections` boxes are considered.
pub fn decode_outputs<T>(
    outputs: &[T],
    slots: OutputSlots,
    params: &SsdParams,
    frame_size: (u32, u32),
) -> Result<Vec<Detection>, Error>
where
    T: std::ops::Deref<Target = Tensor>,
{
    let output = |index: usize| {
        outputs
            .get(index)
            .ok_or_else(|| simple_error!("model output {index} missing, got {}", outputs.len()))
    };

    // Batch size is one, so the flattened boxes are consecutive corner quadruples
    let boxes: Vec<f32> = output(slots.boxes)?
        .to_array_view::<f32>()?
        .iter()
        .cloned()
        .collect();
    let boxes: Vec<[f32; 4]> = boxes
        .chunks_exact(4)
        .map(|corners| [corners[0], corners[1], corners[2], corners[3]])
        .collect();
    let classes: Vec<f32> = output(slots.classes)?
        .to_array_view::<f32>()?
        .slice(s![0, ..])
        .iter()
        .cloned()
        .collect();
    let scores: Vec<f32> = output(slots.scores)?
        .to_array_view::<f32>()?
        .slice(s![0, ..])
        .iter()
        .cloned()
        .collect();
    let count = output(slots.count)?
        .to_array_view::<f32>()?
        .iter()
        .next()
        .map_or(boxes.len(), |count| *count as usize);

    Ok(select_detections(
        &boxes[..count.min(boxes.len())],
        &classes,
        &scores,
        params,
        frame_size,
    ))
}

fn get_ssd_model(path: &Path, width: u32, height: u32) -> Result<NnModel, Error> {
    let input_fact = InferenceFact::dt_shape(
        u8::datum_type(),
        tvec!(1, height as usize, width as usize, 3),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Path of the cached copy of the model behind `url`, downloading it if missing.
async fn get_cached_model(url: &str) -> Result<PathBuf, Error> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| simple_error!("no cache directory available"))?
        .join("detectcam");
    std::fs::create_dir_all(&cache_dir)?;

    let filename = url
        .rsplit('/')
        .next()
        .filter(|name| name.ends_with(".onnx"))
        .unwrap_or(DEFAULT_MODEL_FILENAME);
    let filepath = cache_dir.join(filename);

    if !filepath.exists() {
        log::info!("Downloading model from {} to {}", url, filepath.display());
        download_file(&Client::new(), url, &filepath).await?;
    }

    Ok(filepath)
}

/// Turn raw model outputs into labelled pixel-space detections.
///
/// Candidates below `min_score` or with unknown class ids are dropped, the rest is ordered by
/// sinking confidence and cut to `max_detections`.
pub fn select_detections(
    boxes: &[[f32; 4]],
    classes: &[f32],
    scores: &[f32],
    params: &SsdParams,
    (frame_width, frame_height): (u32, u32),
) -> Vec<Detection> {
    let mut selected: Vec<Detection> = izip!(boxes, classes, scores)
        .filter(|(_, _, score)| **score >= params.min_score)
        .filter_map(|(corners, class_id, score)| {
            coco_label(*class_id as u32).map(|label| {
                Detection::new(
                    BBox::from_normalized_corners(*corners, frame_width, frame_height),
                    label,
                    *score,
                )
            })
        })
        .collect();

    selected.sort_by(|a, b| b.score.total_cmp(&a.score));
    selected.truncate(params.max_detections);
    selected
}

/// Label of a COCO class id. Ids run from 1 to 90 with gaps.
pub fn coco_label(class_id: u32) -> Option<&'static str> {
    COCO_LABELS
        .binary_search_by_key(&class_id, |(id, _)| *id)
        .ok()
        .map(|index| COCO_LABELS[index].1)
}

const COCO_LABELS: [(u32, &str); 80] = [
    (1, "person"),
    (2, "bicycle"),
    (3, "car"),
    (4, "motorcycle"),
    (5, "airplane"),
    (6, "bus"),
    (7, "train"),
    (8, "truck"),
    (9, "boat"),
    (10, "traffic light"),
    (11, "fire hydrant"),
    (13, "stop sign"),
    (14, "parking meter"),
    (15, "bench"),
    (16, "bird"),
    (17, "cat"),
    (18, "dog"),
    (19, "horse"),
    (20, "sheep"),
    (21, "cow"),
    (22, "elephant"),
    (23, "bear"),
    (24, "zebra"),
    (25, "giraffe"),
    (27, "backpack"),
    (28, "umbrella"),
    (31, "handbag"),
    (32, "tie"),
    (33, "suitcase"),
    (34, "frisbee"),
    (35, "skis"),
    (36, "snowboard"),
    (37, "sports ball"),
    (38, "kite"),
    (39, "baseball bat"),
    (40, "baseball glove"),
    (41, "skateboard"),
    (42, "surfboard"),
    (43, "tennis racket"),
    (44, "bottle"),
    (46, "wine glass"),
    (47, "cup"),
    (48, "fork"),
    (49, "knife"),
    (50, "spoon"),
    (51, "bowl"),
    (52, "banana"),
    (53, "apple"),
    (54, "sandwich"),
    (55, "orange"),
    (56, "broccoli"),
    (57, "carrot"),
    (58, "hot dog"),
    (59, "pizza"),
    (60, "donut"),
    (61, "cake"),
    (62, "chair"),
    (63, "couch"),
    (64, "potted plant"),
    (65, "bed"),
    (67, "dining table"),
    (70, "toilet"),
    (72, "tv"),
    (73, "laptop"),
    (74, "mouse"),
    (75, "remote"),
    (76, "keyboard"),
    (77, "cell phone"),
    (78, "microwave"),
    (79, "oven"),
    (80, "toaster"),
    (81, "sink"),
    (82, "refrigerator"),
    (84, "book"),
    (85, "clock"),
    (86, "vase"),
    (87, "scissors"),
    (88, "teddy bear"),
    (89, "hair drier"),
    (90, "toothbrush"),
];

#[cfg(test)]
mod test {

    use std::sync::Arc;

    use super::*;

    fn params() -> SsdParams {
        SsdParams {
            max_detections: 2,
            ..Default::default()
        }
    }

    #[test]
    fn coco_labels_skip_unused_ids() {
        assert_eq!(coco_label(1), Some("person"));
        assert_eq!(coco_label(47), Some("cup"));
        assert_eq!(coco_label(90), Some("toothbrush"));
        assert_eq!(coco_label(12), None);
        assert_eq!(coco_label(0), None);
        assert_eq!(coco_label(91), None);
    }

    #[test]
    fn coco_labels_are_sorted() {
        assert!(COCO_LABELS.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn low_scores_are_dropped() {
        let boxes = [[0.0, 0.0, 0.5, 0.5], [0.5, 0.5, 1.0, 1.0]];
        let detections =
            select_detections(&boxes, &[1.0, 47.0], &[0.9, 0.3], &params(), (640, 480));

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class, "person");
        assert_eq!(detections[0].bbox, BBox::new(0.0, 0.0, 320.0, 240.0));
    }

    #[test]
    fn unknown_classes_are_dropped() {
        let boxes = [[0.0, 0.0, 0.5, 0.5]];
        let detections = select_detections(&boxes, &[12.0], &[0.9], &params(), (640, 480));
        assert!(detections.is_empty());
    }

    #[test]
    fn most_confident_detections_are_kept() {
        let boxes = [[0.0, 0.0, 0.1, 0.1]; 3];
        let detections = select_detections(
            &boxes,
            &[1.0, 18.0, 17.0],
            &[0.6, 0.95, 0.8],
            &params(),
            (640, 480),
        );

        let classes: Vec<_> = detections.iter().map(|d| d.class.as_str()).collect();
        assert_eq!(classes, vec!["dog", "cat"]);
    }

    fn ssd_outputs() -> Vec<Arc<Tensor>> {
        let boxes = tract_ndarray::arr3(&[[
            [0.1f32, 0.25, 0.6, 0.5],
            [0.5, 0.5, 1.0, 1.0],
            [0.0, 0.0, 1.0, 1.0],
        ]]);
        let classes = tract_ndarray::arr2(&[[47.0f32, 1.0, 1.0]]);
        let scores = tract_ndarray::arr2(&[[0.71f32, 0.93, 0.99]]);
        // The third box is padding beyond the reported count
        let count = tract_ndarray::arr1(&[2.0f32]);

        vec![
            Arc::new(Tensor::from(boxes)),
            Arc::new(Tensor::from(classes)),
            Arc::new(Tensor::from(scores)),
            Arc::new(Tensor::from(count)),
        ]
    }

    #[test]
    fn outputs_decode_to_pixel_boxes() -> Result<(), Error> {
        let detections =
            decode_outputs(&ssd_outputs(), OutputSlots::default(), &params(), (640, 480))?;

        assert_eq!(
            detections,
            vec![
                Detection::new(BBox::new(320.0, 240.0, 320.0, 240.0), "person", 0.93),
                Detection::new(BBox::new(160.0, 48.0, 160.0, 240.0), "cup", 0.71),
            ]
        );
        Ok(())
    }

    #[test]
    fn outputs_are_found_by_name() -> Result<(), Error> {
        let slots = OutputSlots::from_names([
            "num_detections:0",
            "detection_scores:0",
            "detection_boxes:0",
            "detection_classes:0",
        ]);
        assert_eq!(
            slots,
            OutputSlots {
                boxes: 2,
                classes: 3,
                scores: 1,
                count: 0,
            }
        );

        let mut outputs = ssd_outputs();
        outputs.reverse();
        outputs.swap(1, 0);
        // Reordered to [scores, count, classes, boxes]
        let slots = OutputSlots {
            boxes: 3,
            classes: 2,
            scores: 0,
            count: 1,
        };
        let detections = decode_outputs(&outputs, slots, &params(), (640, 480))?;
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class, "person");
        Ok(())
    }

    #[test]
    fn unknown_output_names_keep_the_default_order() {
        assert_eq!(
            OutputSlots::from_names(["out0", "out1", "out2", "out3"]),
            OutputSlots::default()
        );
    }

    #[test]
    fn missing_outputs_are_an_error() {
        let mut outputs = ssd_outputs();
        outputs.pop();
        assert!(decode_outputs(&outputs, OutputSlots::default(), &params(), (640, 480)).is_err());
    }

    #[tokio::test]
    async fn missing_model_file_fails_to_load() {
        let source = ModelSource::Path("does-not-exist.onnx".into());
        assert!(SsdModel::load(source, SsdParams::default()).await.is_err());
    }
}
