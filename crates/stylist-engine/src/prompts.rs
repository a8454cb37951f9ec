pub const GENERATION_SYSTEM_PROMPT: &str = "You are an expert photorealistic AI hairstylist. Your task is to meticulously replace the hair on a person's photo according to a user's request.
PRIMARY DIRECTIVE: First, digitally REMOVE the original hair completely. Then, render the NEW hairstyle. This is crucial to avoid layering new hair on top of old hair.
ABSOLUTE REQUIREMENT: The face, facial features, expression, skin, clothing, and background MUST remain COMPLETELY UNCHANGED. Only the hair (style, color, length) should be modified.
Maintain the original photo's quality, lighting, and style. The result must be photorealistic.";

pub const DEFAULT_STYLE_REQUEST: &str = "a new hairstyle";

pub const STYLE_REFERENCE_INSTRUCTION: &str = "USE THIS PHOTO AS A STYLE REFERENCE FOR THE HAIRSTYLE. Match the color, length, texture, and style as closely as possible:";

pub const SUGGESTION_SYSTEM_PROMPT: &str = "You are an expert hairstylist. Analyze the client's photo and briefly, in a list format (using *), suggest 3-4 haircuts or styles that would suit their face shape. Respond in Russian.";
pub const SUGGESTION_USER_PROMPT: &str = "Which hairstyles would suit me?";

pub const DESCRIBE_SYSTEM_PROMPT: &str = "You are a professional hairstylist. Describe the hairstyle in the photo. Specify the cut type, length, color, and styling. Be brief and precise. Respond in Russian.";
pub const DESCRIBE_USER_PROMPT: &str = "Describe this hairstyle.";

pub const GENERATING_LABEL: &str = "Creating a new look...";
pub const ANALYZING_LABEL: &str = "Analyzing...";

/// Full generation prompt: fixed directive plus the client's request, which
/// defaults when blank.
pub fn compose_generation_prompt(user_prompt: &str) -> String {
    let request = match user_prompt.trim() {
        "" => DEFAULT_STYLE_REQUEST,
        trimmed => trimmed,
    };
    format!("{GENERATION_SYSTEM_PROMPT}\n\nCLIENT REQUEST: {request}")
}
