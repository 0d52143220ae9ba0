#[cfg(test)]
mod tests {
    use crate::config::{Backbone, D2NetConfig, ExtractorConfig, SoftDetectionConfig};
    use crate::error::D2NetError;

    #[test]
    fn test_invalid_truncation_depth() {
        let config = ExtractorConfig::new().with_truncated_blocks(4);

        match config.validate() {
            Err(D2NetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("Truncation depth"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_zero_truncation_depth() {
        let config = ExtractorConfig::new().with_truncated_blocks(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_override_requires_residual_backbone() {
        let config = ExtractorConfig::new()
            .with_backbone(Backbone::Vgg16)
            .with_output_channels(Some(128));

        match config.validate() {
            Err(D2NetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("residual"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_zero_channel_override() {
        let config = ExtractorConfig::new()
            .with_backbone(Backbone::Resnet50)
            .with_output_channels(Some(0));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_configuration() {
        let config = D2NetConfig::new().with_extractor(
            ExtractorConfig::new()
                .with_backbone(Backbone::Resnet101)
                .with_truncated_blocks(3)
                .with_output_channels(Some(128)),
        );

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_even_soft_local_max_size() {
        let config =
            D2NetConfig::new().with_detection(SoftDetectionConfig::new().with_soft_local_max_size(4));

        match config.validate() {
            Err(D2NetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("odd"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_backbone_factory_reachable_from_crate_root() {
        use burn::backend::NdArray;

        let device = Default::default();
        let backbone = crate::build_backbone::<NdArray<f32>>(
            &ExtractorConfig::new().with_backbone(Backbone::Vgg16),
            &device,
        );
        assert!(matches!(backbone, Ok(crate::BackboneEnum::Vgg(_))));
    }

    #[test]
    fn test_feature_channels_per_backbone() {
        let vgg = ExtractorConfig::new().with_backbone(Backbone::Vgg16);
        assert_eq!(
            vgg.clone().with_truncated_blocks(1).feature_channels().unwrap(),
            512
        );
        assert_eq!(
            vgg.clone().with_truncated_blocks(2).feature_channels().unwrap(),
            512
        );
        assert_eq!(vgg.with_truncated_blocks(3).feature_channels().unwrap(), 256);

        let resnet = ExtractorConfig::new().with_backbone(Backbone::Resnet50);
        assert_eq!(
            resnet.clone().with_truncated_blocks(1).feature_channels().unwrap(),
            2048
        );
        assert_eq!(
            resnet.clone().with_truncated_blocks(2).feature_channels().unwrap(),
            1024
        );
        assert_eq!(
            resnet.clone().with_truncated_blocks(3).feature_channels().unwrap(),
            512
        );

        let overridden = resnet.with_output_channels(Some(128));
        assert_eq!(overridden.feature_channels().unwrap(), 128);
    }

    #[test]
    fn test_stride_per_backbone() {
        let vgg = ExtractorConfig::new().with_backbone(Backbone::Vgg16);
        assert_eq!(vgg.clone().with_truncated_blocks(1).stride().unwrap(), 16);
        assert_eq!(vgg.clone().with_truncated_blocks(2).stride().unwrap(), 8);
        assert_eq!(vgg.with_truncated_blocks(3).stride().unwrap(), 4);

        let resnet = ExtractorConfig::new().with_backbone(Backbone::Resnet101);
        assert_eq!(resnet.clone().with_truncated_blocks(1).stride().unwrap(), 32);
        assert_eq!(resnet.clone().with_truncated_blocks(2).stride().unwrap(), 16);
        assert_eq!(resnet.with_truncated_blocks(3).stride().unwrap(), 8);
    }
}
