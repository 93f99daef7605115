//! Source-to-deploy pipeline: GitHub source, CodeBuild image build and a
//! rolling `kubectl set image` against the cluster.

use std::collections::BTreeMap;

use cfn_template::{intrinsic, LogicalId, Pseudo, RemovalPolicy, Resource, Stack};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::iam::{self, PolicyDocument, Statement};
use crate::config::AppConfig;
use crate::error::Result;
use crate::manifest::{APP_LABEL, IMAGE_TAG};

pub const BUILD_IMAGE: &str = "aws/codebuild/amazonlinux2-x86_64-standard:3.0";
pub const BUILDSPEC_VERSION: &str = "0.2";

/// Secrets Manager secret holding the GitHub OAuth token.
pub const GITHUB_TOKEN_SECRET: &str = "GITHUB_TOKEN";

/// Actions granted on `*` so the build can log in to the registry and assume
/// the cluster admin role.
const REGISTRY_ACTIONS: [&str; 7] = [
    "ecr:GetAuthorizationToken",
    "ecr:BatchCheckLayerAvailability",
    "ecr:CompleteLayerUpload",
    "ecr:InitiateLayerUpload",
    "ecr:PutImage",
    "ecr:UploadLayerPart",
    "sts:AssumeRole",
];

/// Pull and push on a single repository.
const PULL_PUSH_ACTIONS: [&str; 7] = [
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
    "ecr:PutImage",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
];

const ARTIFACT_ACTIONS: [&str; 6] = [
    "s3:GetObject*",
    "s3:GetBucket*",
    "s3:List*",
    "s3:DeleteObject*",
    "s3:PutObject",
    "s3:Abort*",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub commands: Vec<String>,
}

/// CodeBuild build specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSpec {
    pub version: String,
    pub phases: BTreeMap<String, Phase>,
}

impl BuildSpec {
    /// Log in, build and push `$ECR_REPO_URI:latest`, then roll the
    /// deployment onto the new image.
    #[must_use]
    pub fn image_release() -> Self {
        let phase = |commands: &[&str]| Phase {
            commands: commands.iter().map(ToString::to_string).collect(),
        };
        let tag_export = format!("export TAG={IMAGE_TAG}");

        Self {
            version: BUILDSPEC_VERSION.to_string(),
            phases: BTreeMap::from([
                (
                    "pre_build".to_string(),
                    phase(&[
                        "env",
                        tag_export.as_str(),
                        "$(aws ecr get-login --no-include-email)",
                        "aws eks update-kubeconfig --name $CLUSTER_NAME --role-arn $ROLE_ARN",
                        "kubectl get no",
                    ]),
                ),
                (
                    "build".to_string(),
                    phase(&[
                        "docker build -t $ECR_REPO_URI:$TAG .",
                        "docker push $ECR_REPO_URI:$TAG",
                    ]),
                ),
                (
                    "post_build".to_string(),
                    phase(&[
                        "kubectl get no",
                        "kubectl set image deployment $APP_NAME $APP_NAME=$ECR_REPO_URI:$TAG",
                    ]),
                ),
            ]),
        }
    }

    /// The buildspec as the JSON text CodeBuild expects.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `<account>.dkr.ecr.<region>.<suffix>/<repository>`
#[must_use]
pub fn repository_uri(repository: &LogicalId) -> Value {
    intrinsic::join(
        "",
        vec![
            Pseudo::AccountId.reference(),
            json!(".dkr.ecr."),
            Pseudo::Region.reference(),
            json!("."),
            Pseudo::UrlSuffix.reference(),
            json!("/"),
            repository.reference(),
        ],
    )
}

/// What the pipeline needs from the rest of the cluster stack.
pub struct PipelineProps<'a> {
    pub config: &'a AppConfig,
    pub cluster: &'a LogicalId,
    pub repository: &'a LogicalId,
    pub admin_role: &'a LogicalId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResources {
    pub build_role: LogicalId,
    pub project: LogicalId,
    pub artifact_bucket: LogicalId,
    pub pipeline_role: LogicalId,
    pub pipeline: LogicalId,
    pub webhook: LogicalId,
}

/// Add the build project and the two-stage pipeline to `stack`.
///
/// # Errors
///
/// Returns an error on template bookkeeping or serialization failures.
pub fn add_pipeline(stack: &mut Stack, props: &PipelineProps<'_>) -> Result<PipelineResources> {
    let config = props.config;
    let app = &config.app_name;

    let pipeline_name = format!("{app}-Pipeline");
    let artifact_bucket = stack.add(
        &[&pipeline_name, "ArtifactsBucket", "Resource"],
        Resource::new("AWS::S3::Bucket")
            .properties(json!({
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "aws:kms" },
                    }],
                },
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
            }))
            .removal_policy(RemovalPolicy::Retain),
    )?;
    let bucket_arn = artifact_bucket.get_att("Arn");
    let bucket_objects = intrinsic::join("", vec![bucket_arn.clone(), json!("/*")]);

    let project_name = format!("{app}-CodeBuildProj");
    let build_role = stack.add(
        &[&project_name, "Role", "Resource"],
        iam::role(iam::service_principal("codebuild.amazonaws.com"), &[])?,
    )?;
    let log_group_arn = intrinsic::join(
        "",
        vec![
            json!("arn:"),
            Pseudo::Partition.reference(),
            json!(":logs:"),
            Pseudo::Region.reference(),
            json!(":"),
            Pseudo::AccountId.reference(),
            json!(format!(":log-group:/aws/codebuild/{project_name}")),
        ],
    );
    let build_policy = PolicyDocument::new(vec![
        Statement::allow(PULL_PUSH_ACTIONS).with_resource(props.repository.get_att("Arn")),
        Statement::allow(["ecr:GetAuthorizationToken"]).on_any_resource(),
        Statement::allow(["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"])
            .with_resource(log_group_arn.clone())
            .with_resource(intrinsic::join("", vec![log_group_arn, json!(":*")])),
        Statement::allow(ARTIFACT_ACTIONS)
            .with_resource(bucket_arn.clone())
            .with_resource(bucket_objects.clone()),
        Statement::allow(["eks:DescribeCluster"]).with_resource(props.cluster.get_att("Arn")),
        Statement::allow(REGISTRY_ACTIONS).on_any_resource(),
    ]);
    let build_policy_id = stack.add(
        &[&project_name, "Role", "DefaultPolicy", "Resource"],
        iam::inline_policy(&format!("{project_name}RoleDefaultPolicy"), &build_role, &build_policy)?,
    )?;

    let environment_variables: Vec<Value> = [
        ("CLUSTER_NAME", props.cluster.reference()),
        ("ECR_REPO_URI", repository_uri(props.repository)),
        ("APP_NAME", json!(APP_LABEL)),
        ("ROLE_ARN", props.admin_role.get_att("Arn")),
        ("DOCKER_BUILDKIT", json!("1")),
    ]
    .into_iter()
    .map(|(name, value)| json!({ "Name": name, "Type": "PLAINTEXT", "Value": value }))
    .collect();

    let buildspec = BuildSpec::image_release().to_json()?;
    let project = stack.add(
        &[&project_name, "Resource"],
        Resource::new("AWS::CodeBuild::Project")
            .properties(json!({
                "Name": project_name,
                "ServiceRole": build_role.get_att("Arn"),
                "Artifacts": { "Type": "CODEPIPELINE" },
                "Source": {
                    "Type": "CODEPIPELINE",
                    "BuildSpec": buildspec,
                },
                "Environment": {
                    "Type": "LINUX_CONTAINER",
                    "ComputeType": "BUILD_GENERAL1_SMALL",
                    "Image": BUILD_IMAGE,
                    "ImagePullCredentialsType": "CODEBUILD",
                    "PrivilegedMode": true,
                    "EnvironmentVariables": environment_variables,
                },
            }))
            .depends_on(&build_policy_id),
    )?;

    let pipeline_role = stack.add(
        &[&pipeline_name, "Role", "Resource"],
        iam::role(iam::service_principal("codepipeline.amazonaws.com"), &[])?,
    )?;
    let pipeline_policy = PolicyDocument::new(vec![
        Statement::allow(ARTIFACT_ACTIONS)
            .with_resource(bucket_arn)
            .with_resource(bucket_objects),
        Statement::allow(["codebuild:BatchGetBuilds", "codebuild:StartBuild", "codebuild:StopBuild"])
            .with_resource(project.get_att("Arn")),
    ]);
    let pipeline_policy_id = stack.add(
        &[&pipeline_name, "Role", "DefaultPolicy", "Resource"],
        iam::inline_policy(
            &format!("{pipeline_name}RoleDefaultPolicy"),
            &pipeline_role,
            &pipeline_policy,
        )?,
    )?;

    let source_action = format!("{app}-SourceAction");
    let build_action = format!("{app}-BuildAction");
    let source_artifact = format!("Artifact_Source_{source_action}");
    let oauth_token = intrinsic::secrets_manager(GITHUB_TOKEN_SECRET);

    let pipeline = stack.add(
        &[&pipeline_name, "Resource"],
        Resource::new("AWS::CodePipeline::Pipeline")
            .properties(json!({
                "Name": pipeline_name,
                "RoleArn": pipeline_role.get_att("Arn"),
                "ArtifactStore": { "Type": "S3", "Location": artifact_bucket.reference() },
                "Stages": [
                    {
                        "Name": "Source",
                        "Actions": [{
                            "Name": source_action,
                            "ActionTypeId": {
                                "Category": "Source",
                                "Owner": "ThirdParty",
                                "Provider": "GitHub",
                                "Version": "1",
                            },
                            "Configuration": {
                                "Owner": config.github_owner,
                                "Repo": config.github_repo,
                                "Branch": config.github_branch,
                                "OAuthToken": oauth_token,
                                "PollForSourceChanges": false,
                            },
                            "OutputArtifacts": [{ "Name": source_artifact }],
                            "RunOrder": 1,
                        }],
                    },
                    {
                        "Name": "Build",
                        "Actions": [{
                            "Name": build_action,
                            "ActionTypeId": {
                                "Category": "Build",
                                "Owner": "AWS",
                                "Provider": "CodeBuild",
                                "Version": "1",
                            },
                            "Configuration": { "ProjectName": project.reference() },
                            "InputArtifacts": [{ "Name": source_artifact }],
                            "OutputArtifacts": [{ "Name": format!("Artifact_Build_{build_action}") }],
                            "RunOrder": 1,
                        }],
                    },
                ],
            }))
            .depends_on(&pipeline_role)
            .depends_on(&pipeline_policy_id),
    )?;

    let webhook = stack.add(
        &[&pipeline_name, "Source", &source_action, "WebhookResource"],
        Resource::new("AWS::CodePipeline::Webhook").properties(json!({
            "Authentication": "GITHUB_HMAC",
            "AuthenticationConfiguration": { "SecretToken": oauth_token },
            "Filters": [{
                "JsonPath": "$.ref",
                "MatchEquals": "refs/heads/{Branch}",
            }],
            "TargetAction": source_action,
            "TargetPipeline": pipeline.reference(),
            "TargetPipelineVersion": 1,
            "RegisterWithThirdParty": true,
        })),
    )?;

    debug!(pipeline = %pipeline, project = %project, "Added pipeline");

    Ok(PipelineResources {
        build_role,
        project,
        artifact_bucket,
        pipeline_role,
        pipeline,
        webhook,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buildspec_commands() {
        let spec = BuildSpec::image_release();
        assert_eq!(spec.version, "0.2");
        assert_eq!(
            spec.phases["pre_build"].commands,
            vec![
                "env",
                "export TAG=latest",
                "$(aws ecr get-login --no-include-email)",
                "aws eks update-kubeconfig --name $CLUSTER_NAME --role-arn $ROLE_ARN",
                "kubectl get no",
            ]
        );
        assert_eq!(
            spec.phases["build"].commands,
            vec![
                "docker build -t $ECR_REPO_URI:$TAG .",
                "docker push $ECR_REPO_URI:$TAG",
            ]
        );
        assert_eq!(
            spec.phases["post_build"].commands,
            vec![
                "kubectl get no",
                "kubectl set image deployment $APP_NAME $APP_NAME=$ECR_REPO_URI:$TAG",
            ]
        );
    }

    #[test]
    fn test_buildspec_json() {
        let text = BuildSpec::image_release().to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], "0.2");
        assert!(value["phases"]["build"]["commands"].is_array());
    }

    #[test]
    fn test_repository_uri() {
        let uri = repository_uri(&LogicalId::literal("Repo"));
        let parts = uri["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts.last(), Some(&json!({ "Ref": "Repo" })));
        assert!(parts.contains(&json!(".dkr.ecr.")));
    }
}
