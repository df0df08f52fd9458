use rustrial_k8s_informer_cache_apis::InformerConfiguration;
use serde_yaml;

pub fn main() {
    println!(
        "{}",
        serde_yaml::to_string(&InformerConfiguration::default()).unwrap()
    );
}
