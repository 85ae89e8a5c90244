use kube::CustomResourceExt;
use search_k8s::crd::SearchCluster;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SearchCluster::crd())?);
    Ok(())
}
