mod normalize;

pub use normalize::{
    normalize, peak, process_stem, read_stem, write_stem, PostProcessError, StemAudio,
    StemReport, OUTPUT_BITS, TARGET_PEAK,
};
