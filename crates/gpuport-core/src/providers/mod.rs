mod runpod;

pub use runpod::RunPodCollector;
