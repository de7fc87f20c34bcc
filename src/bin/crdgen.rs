use kube::CustomResourceExt;

fn main() {
    let crds = vec![sso_operator::crds::SSO::crd()];
    print!("{}", serde_yaml::to_string(&crds).unwrap());
}
